#![no_main]
use libfuzzer_sys::fuzz_target;
use rndc::{Message, SerialiseMode};

fuzz_target!(|data: &[u8]| {
    let got = Message::parse(data);
    if let Ok(m) = got {
        let buf = m
            .serialise(SerialiseMode::Full)
            .expect("should be able to serialise");
        let got2 = Message::parse(&buf).expect("must be valid");
        assert_eq!(m, got2);
    }
});
