use serde::Serialize;
use std::fmt::{Display, Formatter};

/// Native instruction set a package (or a device) supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Abi {
    #[serde(rename = "armeabi")]
    Arm,
    #[serde(rename = "armeabi-v7a")]
    Arm7,
    #[serde(rename = "arm64-v8a")]
    Arm64,
    #[serde(rename = "x86")]
    X86,
    #[serde(rename = "x86_64")]
    X86_64,
    #[serde(rename = "unknown")]
    Unknown,
}

impl Abi {
    /// Every known ABI, [Abi::Unknown] excluded
    pub const ALL: [Abi; 5] = [Abi::Arm, Abi::Arm7, Abi::Arm64, Abi::X86, Abi::X86_64];

    /// Decode a raw ABI token, new or unexpected tokens become [Abi::Unknown]
    pub fn decode(token: &str) -> Abi {
        match token.trim() {
            "armeabi" => Abi::Arm,
            "armeabi-v7a" => Abi::Arm7,
            "arm64-v8a" => Abi::Arm64,
            "x86" => Abi::X86,
            "x86_64" => Abi::X86_64,
            _ => Abi::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Abi::Arm => "armeabi",
            Abi::Arm7 => "armeabi-v7a",
            Abi::Arm64 => "arm64-v8a",
            Abi::X86 => "x86",
            Abi::X86_64 => "x86_64",
            Abi::Unknown => "unknown",
        }
    }

    /// ABIs whose code a device with this ABI can also run (besides its own)
    fn runs(&self) -> &'static [Abi] {
        match self {
            Abi::X86_64 => &[Abi::X86, Abi::Arm64, Abi::Arm7, Abi::Arm],
            Abi::X86 => &[Abi::Arm64, Abi::Arm7, Abi::Arm],
            Abi::Arm64 => &[Abi::Arm7, Abi::Arm],
            Abi::Arm7 => &[Abi::Arm],
            Abi::Arm | Abi::Unknown => &[],
        }
    }

    /// Whether a device with this ABI can run code built for `other`.
    ///
    /// The relation is not symmetric: `X86_64` runs `Arm7` code, `Arm7` does not run `X86_64` code.
    pub fn is_compatible_with(&self, other: Abi) -> bool {
        *self == other || self.runs().contains(&other)
    }
}

impl Display for Abi {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_known_tokens() {
        for abi in Abi::ALL {
            assert_eq!(Abi::decode(abi.as_str()), abi);
        }
    }

    #[test]
    fn decode_unknown_token() {
        assert_eq!(Abi::decode("mips"), Abi::Unknown);
        assert_eq!(Abi::decode("riscv64"), Abi::Unknown);
        assert_eq!(Abi::decode(""), Abi::Unknown);
    }

    #[test]
    fn compatibility_is_asymmetric() {
        assert!(Abi::X86_64.is_compatible_with(Abi::Arm7));
        assert!(!Abi::Arm7.is_compatible_with(Abi::X86_64));
        assert!(Abi::Arm64.is_compatible_with(Abi::Arm));
        assert!(!Abi::Arm.is_compatible_with(Abi::Arm64));
    }

    #[test]
    fn compatibility_lattice() {
        assert!(Abi::X86.is_compatible_with(Abi::Arm64));
        assert!(!Abi::X86.is_compatible_with(Abi::X86_64));
        assert!(Abi::Arm7.is_compatible_with(Abi::Arm));
        assert!(!Abi::Arm7.is_compatible_with(Abi::Arm64));
        for abi in Abi::ALL {
            assert!(abi.is_compatible_with(abi));
            assert!(!Abi::Unknown.is_compatible_with(abi));
        }
        assert!(Abi::Unknown.is_compatible_with(Abi::Unknown));
        assert!(!Abi::X86_64.is_compatible_with(Abi::Unknown));
    }
}
