#![no_main]
use core_oob::OobFrame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Decoding returns a frame or a defined error; a decoded frame re-encodes
    // to something that decodes to the same frame.
    if let Ok(frame) = OobFrame::decode(data) {
        let encoded = frame.encode().expect("decoded frame must re-encode");
        let again = OobFrame::decode(&encoded).expect("re-encoded frame must decode");
        assert_eq!(again, frame);
    }
});
