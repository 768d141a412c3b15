//! Property-based tests for the cipher transform and frame rendering.
//!
//! Uses proptest to verify:
//! 1. `decrypt(encrypt(s)) == s` for any string and any key.
//! 2. Non-letters are left in place by both directions.
//! 3. Encoding never changes the character count.
//! 4. Rendered client frames parse back to the same frame.

use linechat_proto::cipher::{self, Cipher};
use linechat_proto::frame::{ClientFrame, DisconnectNotice, FileAnnouncement, ServerFrame};
use proptest::prelude::*;

proptest! {
    #[test]
    fn default_key_round_trip(s in ".*") {
        prop_assert_eq!(cipher::decrypt(&cipher::encrypt(&s)), s);
    }

    #[test]
    fn any_key_round_trip(key in "[A-Za-z0-9 ]{0,40}", s in ".*") {
        let c = Cipher::new(&key);
        prop_assert_eq!(c.decrypt(&c.encrypt(&s)), s);
    }

    #[test]
    fn letter_sequences_round_trip(s in "[A-Za-z]{0,256}") {
        let encoded = cipher::encrypt(&s);
        prop_assert!(encoded.chars().all(|c| c.is_ascii_alphabetic()));
        prop_assert_eq!(cipher::decrypt(&encoded), s);
    }

    #[test]
    fn non_letters_are_identity(s in "[^A-Za-z]*") {
        prop_assert_eq!(cipher::encrypt(&s), s.clone());
        prop_assert_eq!(cipher::decrypt(&s), s);
    }

    #[test]
    fn encoding_preserves_char_count_and_case(s in ".*") {
        let encoded = cipher::encrypt(&s);
        prop_assert_eq!(encoded.chars().count(), s.chars().count());
        for (a, b) in s.chars().zip(encoded.chars()) {
            prop_assert_eq!(a.is_ascii_uppercase(), b.is_ascii_uppercase());
            prop_assert_eq!(a.is_ascii_lowercase(), b.is_ascii_lowercase());
        }
    }

    #[test]
    fn disconnect_frame_round_trip(
        username in "[a-zA-Z0-9_]{1,16}",
        ip in "(([0-9]{1,3}\\.){3}[0-9]{1,3}|::1|fe80::[0-9a-f]{1,4})",
        port in any::<u16>(),
    ) {
        let frame = ClientFrame::Disconnect(DisconnectNotice { username, ip, port });
        prop_assert_eq!(ClientFrame::parse(&frame.to_line()).unwrap(), frame);
    }

    #[test]
    fn file_frame_round_trip(
        sender in "[a-zA-Z0-9_]{1,16}",
        filename in "[a-zA-Z0-9_.:-]{1,32}",
        filesize in any::<u64>(),
    ) {
        prop_assume!(!filename.starts_with(':'));
        let frame = ServerFrame::File(FileAnnouncement { sender, filename, filesize });
        prop_assert_eq!(ServerFrame::parse(&frame.to_line()).unwrap(), frame);
    }

    #[test]
    fn server_parse_never_panics(line in ".*") {
        let _ = ServerFrame::parse(&line);
        let _ = ClientFrame::parse(&line);
    }
}
