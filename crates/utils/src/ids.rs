use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;

/// Generates a base64-url random object id, used for local/synced XSP
/// objects; message objects instead get a server-assigned id.
pub fn random_obj_id() -> String {
    let mut bytes = [0u8; 18];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn decode(s: &str) -> trc::Result<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(s).map_err(|err| {
        trc::EventType::Ipc(trc::IpcEvent::MissingBodyBytes)
            .into_err()
            .reason(err)
            .details("invalid base64url")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn obj_ids_are_url_safe_and_unique() {
        let a = random_obj_id();
        let b = random_obj_id();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let data = b"hello object".to_vec();
        let encoded = encode(&data);
        assert_eq!(decode(&encoded).unwrap(), data);
    }
}
