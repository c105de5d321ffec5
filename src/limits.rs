//! Input bounds. Everything here is a hard reject, not a truncation.

/// Names of device types and models (matches the original schema's VARCHAR(255)).
pub const MAX_NAME_LEN: usize = 255;

pub const MAX_USERNAME_LEN: usize = 64;

pub const MAX_PASSWORD_LEN: usize = 128;

/// Connections per child device, counting archived ones.
pub const MAX_LINKS_PER_CHILD: usize = 4096;

/// Earliest year a connection date may carry. Anything older is a typo.
pub const MIN_VALID_YEAR: i32 = 1900;
