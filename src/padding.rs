// PKCS#7 padding, as the attacked targets apply it.
//
// `block_size` is a `u8` because a padding byte has to hold the pad length,
// which caps usable block sizes at 255.

/// Pad `bytes` to a multiple of `block_size`. Always adds at least one byte.
pub fn pkcs7_pad(bytes: &[u8], block_size: u8) -> Vec<u8> {
    let pad_len = block_size - (bytes.len() % block_size as usize) as u8;
    bytes
        .iter()
        .copied()
        .chain(std::iter::repeat(pad_len).take(pad_len as usize))
        .collect()
}

/// Strip valid padding in place, returning how many bytes were removed.
/// Leaves `bytes` untouched when the padding is not valid.
pub fn pkcs7_unpad(bytes: &mut Vec<u8>) -> Option<u8> {
    let pad_len = pkcs7_padding_len(bytes)?;
    bytes.truncate(bytes.len() - pad_len as usize);
    Some(pad_len)
}

pub fn pkcs7_padding_len(bytes: &[u8]) -> Option<u8> {
    let pad_len = *bytes.last()?;
    let start = bytes.len().checked_sub(pad_len as usize)?;
    (pad_len != 0 && bytes[start..].iter().all(|b| *b == pad_len)).then_some(pad_len)
}
