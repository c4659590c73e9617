//! Fuzz target: persisted-record and command decoders
//!
//! Feeds arbitrary bytes to the config and metadata decoders and to both
//! command byte decoders. None may panic; a decoded config either
//! validates or is rejected with a typed error.
//!
//! cargo fuzz run fuzz_record_decoders

#![no_main]

use impedance_node::app::commands::{LinkCommand, SerialCommand};
use impedance_node::config::{Config, validate_config};
use impedance_node::sweep::{METADATA_LEN, Metadata};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(config) = Config::from_bytes(data) {
        let _ = validate_config(&config);
        // Anything that decodes must encode again.
        let bytes = config.to_bytes().expect("re-encode");
        assert_eq!(Config::from_bytes(&bytes).ok(), Some(config));
    }

    match Metadata::from_bytes(data) {
        Some(meta) => assert_eq!(&meta.to_bytes()[..], &data[..METADATA_LEN]),
        None => assert!(data.len() < METADATA_LEN),
    }

    for &b in data {
        let _ = SerialCommand::try_from(b);
        let _ = LinkCommand::try_from(b);
    }
});
