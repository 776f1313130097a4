//! RC4 as used by the standard security handler (V ≤ 4, method V2).

pub struct Rc4 {
    state: [u8; 256],
}

impl Rc4 {
    pub fn new(key: &[u8]) -> Rc4 {
        debug_assert!(!key.is_empty());
        let mut state = [0u8; 256];
        for (i, slot) in state.iter_mut().enumerate() {
            *slot = i as u8;
        }
        let mut j: u8 = 0;
        for i in 0..256 {
            j = j
                .wrapping_add(state[i])
                .wrapping_add(key[i % key.len()]);
            state.swap(i, j as usize);
        }
        Rc4 { state }
    }

    /// Encryption and decryption are the same keystream XOR.
    pub fn apply(&mut self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len());
        let mut i: u8 = 0;
        let mut j: u8 = 0;
        for &byte in data {
            i = i.wrapping_add(1);
            j = j.wrapping_add(self.state[i as usize]);
            self.state.swap(i as usize, j as usize);
            let k = self.state
                [(self.state[i as usize].wrapping_add(self.state[j as usize])) as usize];
            out.push(byte ^ k);
        }
        out
    }
}

pub fn rc4_apply(key: &[u8], data: &[u8]) -> Vec<u8> {
    Rc4::new(key).apply(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        // RFC 6229-style check vectors.
        assert_eq!(
            rc4_apply(b"Key", b"Plaintext"),
            [0xBB, 0xF3, 0x16, 0xE8, 0xD9, 0x40, 0xAF, 0x0A, 0xD3]
        );
        assert_eq!(
            rc4_apply(b"Wiki", b"pedia"),
            [0x10, 0x21, 0xBF, 0x04, 0x20]
        );
    }

    #[test]
    fn apply_twice_round_trips() {
        let data = b"some stream bytes".to_vec();
        let once = rc4_apply(b"secret", &data);
        assert_eq!(rc4_apply(b"secret", &once), data);
    }
}
