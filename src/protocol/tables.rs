//! Static channel and RSSI lookup tables for VMR64 readers.
//!
//! Both tables are indexed by the raw byte the reader reports. The channel
//! table covers the ETSI band (channels `0x00..=0x06`) followed by the FCC
//! band (`0x07..=0x3B`). The RSSI table is not linear: there is no entry
//! for -40 dBm.

/// First raw RSSI code present in [`RSSI_DBM`].
pub const RSSI_FIRST_CODE: u8 = 0x1F;

/// Last raw RSSI code present in [`RSSI_DBM`].
pub const RSSI_LAST_CODE: u8 = 0x6E;

/// Carrier frequency in MHz, indexed by channel code.
pub const FREQUENCY_TABLE: [f64; 60] = [
    865.0, 865.5, 866.0, 866.5, 867.0, 867.5, 868.0, 902.0,
    902.5, 903.0, 903.5, 904.0, 904.5, 905.0, 905.5, 906.0,
    906.5, 907.0, 907.5, 908.0, 908.5, 909.0, 909.5, 910.0,
    910.5, 911.0, 911.5, 912.0, 912.5, 913.0, 913.5, 914.0,
    914.5, 915.0, 915.5, 916.0, 916.5, 917.0, 917.5, 918.0,
    918.5, 919.0, 919.5, 920.0, 920.5, 921.0, 921.5, 922.0,
    922.5, 923.0, 923.5, 924.0, 924.5, 925.0, 925.5, 926.0,
    926.5, 927.0, 927.5, 928.0,
];

/// Signal strength in dBm, indexed by `raw - RSSI_FIRST_CODE`.
pub const RSSI_DBM: [i16; 80] = [
    -99, -98, -97, -96, -95, -94, -93, -92, -91, -90,
    -89, -88, -87, -86, -85, -84, -83, -82, -81, -80,
    -79, -78, -77, -76, -75, -74, -73, -72, -71, -70,
    -69, -68, -67, -66, -65, -64, -63, -62, -61, -60,
    -59, -58, -57, -56, -55, -54, -53, -52, -51, -50,
    -49, -48, -47, -46, -45, -44, -43, -42, -41, -39,
    -38, -37, -36, -35, -34, -33, -32, -31, -30, -29,
    -28, -27, -26, -25, -24, -23, -22, -21, -20, -19,
];

/// Frequency for a channel code, if the reader's table defines it.
#[inline]
pub fn frequency_mhz(channel: u8) -> Option<f64> {
    FREQUENCY_TABLE.get(channel as usize).copied()
}

/// dBm value for a raw RSSI code, if the reader's table defines it.
#[inline]
pub fn rssi_dbm(raw: u8) -> Option<i16> {
    if !(RSSI_FIRST_CODE..=RSSI_LAST_CODE).contains(&raw) {
        return None;
    }
    RSSI_DBM.get((raw - RSSI_FIRST_CODE) as usize).copied()
}

/// Look up a frequency by its two-digit hex key ("00".."3B").
pub fn frequency_by_key(key: &str) -> Option<f64> {
    parse_key(key).and_then(frequency_mhz)
}

/// Look up an RSSI value by its two-digit hex key ("1F".."6E").
pub fn rssi_by_key(key: &str) -> Option<i16> {
    parse_key(key).and_then(rssi_dbm)
}

fn parse_key(key: &str) -> Option<u8> {
    let mut byte = [0u8; 1];
    hex::decode_to_slice(key, &mut byte).ok()?;
    Some(byte[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_boundaries() {
        assert_eq!(frequency_by_key("00"), Some(865.0));
        assert_eq!(frequency_by_key("06"), Some(868.0));
        assert_eq!(frequency_by_key("07"), Some(902.0));
        assert_eq!(frequency_by_key("3B"), Some(928.0));
        assert_eq!(frequency_by_key("3C"), None);
    }

    #[test]
    fn test_frequency_steps_are_half_megahertz() {
        for pair in FREQUENCY_TABLE[7..].windows(2) {
            assert_eq!(pair[1] - pair[0], 0.5);
        }
    }

    #[test]
    fn test_rssi_boundaries() {
        assert_eq!(rssi_by_key("6E"), Some(-19));
        assert_eq!(rssi_by_key("1F"), Some(-99));
        assert_eq!(rssi_by_key("6F"), None);
        assert_eq!(rssi_by_key("1E"), None);
    }

    #[test]
    fn test_rssi_skips_minus_forty() {
        assert_eq!(rssi_dbm(0x5A), Some(-39));
        assert_eq!(rssi_dbm(0x59), Some(-41));
        assert!(!RSSI_DBM.contains(&-40));
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        assert_eq!(rssi_by_key("6e"), rssi_by_key("6E"));
        assert_eq!(frequency_by_key("3b"), Some(928.0));
    }

    #[test]
    fn test_malformed_keys() {
        assert_eq!(rssi_by_key(""), None);
        assert_eq!(rssi_by_key("6"), None);
        assert_eq!(rssi_by_key("zz"), None);
        assert_eq!(frequency_by_key("007"), None);
    }
}
