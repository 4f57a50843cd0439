//! Core types for `databroker`: the record envelope, fixed-width version tokens, the storage codec, and clocks.

pub mod clock;
pub mod codec;
pub mod record;
pub mod version;

pub use clock::{ClockSource, ManualClock, SystemClock};
pub use codec::{decode_record, encode_record, CodecError};
pub use record::{Record, TypedData};
pub use version::{Version, VersionError, VERSION_WIDTH};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
