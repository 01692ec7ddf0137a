//! Protocol Module Tests
//!
//! Validates the header codec: field order, optional fields, payload framing and the
//! rejection of malformed input.

#[cfg(test)]
mod tests {
    use crate::network::types::{Channel, PeerId};
    use crate::protocol::message::{Body, Message, ProtocolError, Version};
    use crate::storage::chunker::file_id_for;
    use crate::storage::types::{ChunkKey, FileId, MAX_CHUNK_SIZE};

    fn sender() -> PeerId {
        PeerId("peer1".to_string())
    }

    fn key(index: u32) -> ChunkKey {
        ChunkKey::new(file_id_for(b"protocol"), index)
    }

    fn header_of(bytes: &[u8]) -> String {
        let text = String::from_utf8_lossy(bytes);
        text.split("\r\n\r\n").next().unwrap().to_string()
    }

    // ============================================================
    // ENCODING TESTS
    // ============================================================

    #[test]
    fn test_putchunk_header_layout() {
        let message = Message::put_chunk(Version::Base, sender(), &key(3), 2, b"data".to_vec());
        let bytes = message.encode();

        assert_eq!(
            header_of(&bytes),
            format!("PUTCHUNK 1.0 peer1 {} 3 2", key(3).file_id)
        );
        assert!(bytes.ends_with(b"\r\n\r\ndata"));
        assert_eq!(message.body.channel(), Channel::Push);
    }

    #[test]
    fn test_delete_carries_no_chunk_index() {
        let file_id = key(0).file_id;
        let message = Message::delete(Version::Enhanced, sender(), file_id.clone());

        assert_eq!(
            header_of(&message.encode()),
            format!("DELETE 2.0 peer1 {}", file_id)
        );
        assert!(message.chunk_key().is_none());
    }

    #[test]
    fn test_getchunk_callback_port_is_optional() {
        let with_port = Message::get_chunk(Version::Base, sender(), &key(1), Some(4500));
        let without = Message::get_chunk(Version::Base, sender(), &key(1), None);

        assert!(header_of(&with_port.encode()).ends_with(" 1 4500"));
        assert!(header_of(&without.encode()).ends_with(" 1"));
        assert_eq!(Message::decode(&with_port.encode()).unwrap(), with_port);
        assert_eq!(Message::decode(&without.encode()).unwrap(), without);
    }

    // ============================================================
    // DECODING TESTS
    // ============================================================

    #[test]
    fn test_decode_putchunk_with_binary_payload() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(1_000).collect();
        let message = Message::put_chunk(Version::Enhanced, sender(), &key(7), 3, payload.clone());

        let decoded = Message::decode(&message.encode()).unwrap();

        assert_eq!(decoded.version, Version::Enhanced);
        assert_eq!(decoded.sender, sender());
        assert_eq!(decoded.chunk_key(), Some(key(7)));
        assert_eq!(
            decoded.body,
            Body::PutChunk {
                index: 7,
                desired_degree: 3,
                payload,
            }
        );
    }

    #[test]
    fn test_payload_may_contain_header_terminator() {
        let payload = b"before\r\n\r\nafter".to_vec();
        let message = Message::chunk(sender(), &key(0), payload.clone());

        let decoded = Message::decode(&message.encode()).unwrap();
        assert_eq!(
            decoded.body,
            Body::Chunk {
                index: 0,
                payload: Some(payload),
            }
        );
    }

    #[test]
    fn test_empty_chunk_is_data_not_announcement() {
        let data = Message::chunk(sender(), &key(2), Vec::new());
        let announcement = Message::chunk_announcement(sender(), &key(2));

        assert_eq!(
            Message::decode(&data.encode()).unwrap().body,
            Body::Chunk {
                index: 2,
                payload: Some(Vec::new()),
            }
        );
        assert_eq!(
            Message::decode(&announcement.encode()).unwrap().body,
            Body::Chunk {
                index: 2,
                payload: None,
            }
        );
    }

    #[test]
    fn test_decode_tolerates_repeated_spaces() {
        let file_id = key(0).file_id;
        let raw = format!("STORED  1.0   peer9 {}  4\r\n\r\n", file_id);

        let decoded = Message::decode(raw.as_bytes()).unwrap();
        assert_eq!(decoded.body, Body::Stored { index: 4 });
        assert_eq!(decoded.sender, PeerId("peer9".to_string()));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let file_id = key(0).file_id;
        let cases: Vec<(Vec<u8>, ProtocolError)> = vec![
            (b"".to_vec(), ProtocolError::MissingTerminator),
            (
                format!("STORED 1.0 p {} 1", file_id).into_bytes(),
                ProtocolError::MissingTerminator,
            ),
            (
                format!("HELLO 1.0 p {} 1\r\n\r\n", file_id).into_bytes(),
                ProtocolError::UnknownType("HELLO".to_string()),
            ),
            (
                format!("STORED 3.0 p {} 1\r\n\r\n", file_id).into_bytes(),
                ProtocolError::UnknownVersion("3.0".to_string()),
            ),
            (
                b"STORED 1.0 p abc 1\r\n\r\n".to_vec(),
                ProtocolError::InvalidFileId("abc".to_string()),
            ),
            (
                format!("STORED 1.0 p {}\r\n\r\n", file_id).into_bytes(),
                ProtocolError::MissingField("chunk index"),
            ),
            (
                format!("REMOVED 1.0 p {} x\r\n\r\n", file_id).into_bytes(),
                ProtocolError::InvalidNumber {
                    field: "chunk index",
                    value: "x".to_string(),
                },
            ),
            (
                format!("PUTCHUNK 1.0 p {} 0 0\r\n\r\n", file_id).into_bytes(),
                ProtocolError::InvalidDegree(0),
            ),
            (
                format!("DELETE 1.0 p {} 5\r\n\r\n", file_id).into_bytes(),
                ProtocolError::UnexpectedField("5".to_string()),
            ),
        ];

        for (raw, expected) in cases {
            assert_eq!(Message::decode(&raw), Err(expected));
        }
    }

    #[test]
    fn test_decode_rejects_oversized_payload() {
        let mut raw = format!("PUTCHUNK 1.0 p {} 0 1\r\n\r\n", key(0).file_id).into_bytes();
        raw.extend(std::iter::repeat_n(0u8, MAX_CHUNK_SIZE + 1));

        assert_eq!(
            Message::decode(&raw),
            Err(ProtocolError::PayloadTooLarge(MAX_CHUNK_SIZE + 1))
        );
    }

    #[test]
    fn test_uppercase_file_id_is_normalized() {
        let upper = key(0).file_id.0.to_ascii_uppercase();
        let raw = format!("DELETEDCHUNK 2.0 p {} 0\r\n\r\n", upper);

        let decoded = Message::decode(raw.as_bytes()).unwrap();
        assert_eq!(decoded.file_id, FileId(upper.to_ascii_lowercase()));
    }
}
