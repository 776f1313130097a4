use aes::cipher::block_padding::{PadType, RawPadding, UnpadError};

/// Pad a block with bytes whose value is the number of bytes added, as
/// [RFC 2898](https://tools.ietf.org/html/rfc2898) describes. AES stream and
/// string payloads use this over 16-byte blocks.
#[derive(Clone, Copy, Debug)]
pub struct Pkcs5;

impl RawPadding for Pkcs5 {
    const TYPE: PadType = PadType::Reversible;

    #[inline]
    fn raw_pad(block: &mut [u8], pos: usize) {
        debug_assert!(block.len() <= 16, "block size is too big for PKCS#5");
        debug_assert!(pos < block.len(), "`pos` is bigger or equal to block size");
        let n = (block.len() - pos) as u8;
        for b in &mut block[pos..] {
            *b = n;
        }
    }

    #[inline]
    fn raw_unpad(block: &[u8]) -> Result<&[u8], UnpadError> {
        if block.is_empty() || block.len() > 16 {
            return Err(UnpadError);
        }
        let n = block[block.len() - 1] as usize;
        if n == 0 || n > block.len() {
            return Err(UnpadError);
        }
        // Real files sometimes carry sloppy padding; only the count byte is
        // checked.
        Ok(&block[..block.len() - n])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_then_unpad() {
        let mut block = [0u8; 16];
        block[..4].copy_from_slice(b"data");
        Pkcs5::raw_pad(&mut block, 4);
        assert_eq!(block[15], 12);
        assert_eq!(Pkcs5::raw_unpad(&block).unwrap(), b"data");
    }

    #[test]
    fn unpad_rejects_bad_counts() {
        assert!(Pkcs5::raw_unpad(&[0u8; 16]).is_err());
        assert!(Pkcs5::raw_unpad(&[17u8; 16]).is_err());
    }
}
