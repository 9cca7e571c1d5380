/// How a downloaded file gets delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryStrategy {
    /// One upload through the user's preferred standard backend.
    Direct,
    /// Fixed-size parts, each uploaded as a document.
    Split,
    /// One upload through the large-capacity backend.
    Elevated,
}

impl DeliveryStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Split => "split",
            Self::Elevated => "elevated",
        }
    }
}

/// Pick a strategy for a file of `byte_size`.
///
/// Photos are always direct. Anything above `size_limit` goes elevated only
/// when an elevated backend exists and the requester is entitled, otherwise it
/// is split.
pub fn select(
    byte_size: u64,
    is_photo: bool,
    entitled: bool,
    elevated_available: bool,
    size_limit: u64,
) -> DeliveryStrategy {
    if is_photo {
        return DeliveryStrategy::Direct;
    }
    if byte_size > size_limit {
        if elevated_available && entitled {
            return DeliveryStrategy::Elevated;
        }
        return DeliveryStrategy::Split;
    }
    DeliveryStrategy::Direct
}
