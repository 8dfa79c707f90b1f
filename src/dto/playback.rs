//! DTO definitions for the admin playback command surface.

use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

/// Payload of the volume command.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct VolumeRequest {
    /// New broadcast volume, 0-100.
    #[validate(range(max = 100))]
    pub volume: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_bounds_are_enforced() {
        assert!(VolumeRequest { volume: 0 }.validate().is_ok());
        assert!(VolumeRequest { volume: 100 }.validate().is_ok());
        assert!(VolumeRequest { volume: 101 }.validate().is_err());
    }
}
