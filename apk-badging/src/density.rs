/// Canonical DPI of each named density bucket
const BUCKETS: [(&str, u32); 7] = [
    ("ldpi", 120),
    ("mdpi", 160),
    ("tvdpi", 213),
    ("hdpi", 240),
    ("xhdpi", 320),
    ("xxhdpi", 480),
    ("xxxhdpi", 640),
];

/// Suffix shared by every density bucket name
pub const DENSITY_SUFFIX: &str = "dpi";

/// Map a density bucket name (`xxhdpi`) to its canonical DPI
pub fn bucket_dpi(bucket: &str) -> Option<u32> {
    BUCKETS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(bucket))
        .map(|(_, dpi)| *dpi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_buckets() {
        assert_eq!(bucket_dpi("ldpi"), Some(120));
        assert_eq!(bucket_dpi("xxhdpi"), Some(480));
        assert_eq!(bucket_dpi("XXXHDPI"), Some(640));
    }

    #[test]
    fn unknown_bucket() {
        assert_eq!(bucket_dpi("nodpi"), None);
        assert_eq!(bucket_dpi("anydpi"), None);
    }
}
