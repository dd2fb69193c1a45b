use afl::*;

use fw_package_parser::{PackageParser, ProtocolVersion};

fn main() {
    fuzz!(|data: &[u8]| {
        let mut parser = PackageParser::new(ProtocolVersion::V1_0_0).unwrap();
        parser.register_component_route(vec![], |_, _| {});

        // split into two chunks partway through, just to exercise the
        // incremental path; either half may be empty.
        let split = data.len() / 2;
        let _ = parser.process_bytes(&data[..split]);
        let _ = parser.process_bytes(&data[split..]);
    })
}
