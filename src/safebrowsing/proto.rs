//! Wire types for the Safe Browsing v5 `hashes:search` endpoint.
//!
//! Only the fields the lookup path reads are declared; prost skips unknown
//! fields, so the server may send more.

/// A full 32-byte SHA-256 hash matched by the submitted prefix.
#[derive(Clone, PartialEq, prost::Message)]
pub struct FullHash {
    #[prost(bytes = "vec", tag = "1")]
    pub full_hash: Vec<u8>,
}

/// Response to `GET /v5/hashes:search`.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SearchHashesResponse {
    #[prost(message, repeated, tag = "1")]
    pub full_hashes: Vec<FullHash>,
    /// How long the client may cache this response.
    #[prost(message, optional, tag = "2")]
    pub cache_duration: Option<prost_types::Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_round_trip() {
        let response = SearchHashesResponse {
            full_hashes: vec![FullHash {
                full_hash: vec![0xAB; 32],
            }],
            cache_duration: Some(prost_types::Duration {
                seconds: 300,
                nanos: 0,
            }),
        };

        let bytes = response.encode_to_vec();
        let decoded = SearchHashesResponse::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_empty_response_decodes() {
        let decoded = SearchHashesResponse::decode(&[][..]).unwrap();
        assert!(decoded.full_hashes.is_empty());
        assert!(decoded.cache_duration.is_none());
    }
}
