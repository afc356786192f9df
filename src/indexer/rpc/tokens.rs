use alloy_primitives::{Bytes, U256, keccak256};
use alloy_sol_types::SolValue;

/// First four bytes of the keccak hash of a function signature.
pub fn function_selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Calldata for a zero-argument function.
pub fn call_data(signature: &str) -> Bytes {
    Bytes::copy_from_slice(&function_selector(signature))
}

/// Decodes an ABI `string` return value. Older tokens return `bytes32` instead, which is read as
/// a NUL-padded string.
pub fn decode_string(output: &Bytes) -> Option<String> {
    String::abi_decode(output)
        .ok()
        .map(|text| text.trim_matches('\0').to_string())
        .or_else(|| decode_bytes32_string(output))
}

pub fn decode_uint(output: &Bytes) -> Option<U256> {
    U256::abi_decode(output).ok()
}

fn decode_bytes32_string(output: &Bytes) -> Option<String> {
    if output.len() != 32 {
        return None;
    }
    let end = output.iter().position(|&b| b == 0).unwrap_or(32);
    let text = std::str::from_utf8(&output[..end]).ok()?;
    Some(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(value: u64) -> Vec<u8> {
        U256::from(value).to_be_bytes::<32>().to_vec()
    }

    #[test]
    fn test_known_selectors() {
        assert_eq!(function_selector("totalSupply()"), [0x18, 0x16, 0x0d, 0xdd]);
        assert_eq!(function_selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
    }

    #[test]
    fn test_decode_abi_string() {
        let mut raw = word(32);
        raw.extend(word(4));
        let mut data = b"USDT".to_vec();
        data.resize(32, 0);
        raw.extend(data);
        assert_eq!(decode_string(&Bytes::from(raw)).as_deref(), Some("USDT"));

        let encoded = Bytes::from("Wrapped Ether".to_string().abi_encode());
        assert_eq!(decode_string(&encoded).as_deref(), Some("Wrapped Ether"));
    }

    #[test]
    fn test_decode_bytes32_fallback() {
        let mut raw = b"MKR".to_vec();
        raw.resize(32, 0);
        assert_eq!(decode_string(&Bytes::from(raw)).as_deref(), Some("MKR"));
    }

    #[test]
    fn test_decode_rejects_short_output() {
        assert!(decode_string(&Bytes::new()).is_none());
        assert!(decode_uint(&Bytes::from(vec![1, 2, 3])).is_none());
        assert_eq!(decode_uint(&Bytes::from(word(18))), Some(U256::from(18)));
    }
}
