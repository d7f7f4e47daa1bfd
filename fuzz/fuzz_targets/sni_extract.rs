#![no_main]
use arbitrary::Arbitrary;
use core_sni::{extract_hostname, SniError, Status};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    data: Vec<u8>,
    max: u16,
}

fuzz_target!(|inp: Input| {
    let max = inp.max as usize;
    match extract_hostname(&inp.data, max) {
        Ok(Status::Complete(host)) => {
            assert!(!host.is_empty());
            assert!(host.bytes().all(|b| b.is_ascii_graphic()));
        }
        Ok(Status::Partial { needed }) => assert!(needed > 0),
        Err(SniError::HandshakeTooLarge { size, max: cap }) => assert!(size > cap),
        Err(_) => {}
    }

    // a result on a prefix must never contradict the result on the whole
    if let Ok(Status::Complete(whole)) = extract_hostname(&inp.data, usize::MAX) {
        for cut in [inp.data.len() / 2, inp.data.len().saturating_sub(1)] {
            if let Ok(Status::Complete(part)) = extract_hostname(&inp.data[..cut], usize::MAX) {
                assert_eq!(part, whole);
            }
        }
    }
});
