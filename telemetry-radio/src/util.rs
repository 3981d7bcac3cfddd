use bytes::Buf;

pub trait BufReadBytesExt {
    fn get_bytes<const N: usize>(&mut self) -> [u8; N];
}

impl<B: Buf> BufReadBytesExt for B {
    fn get_bytes<const N: usize>(&mut self) -> [u8; N] {
        let mut data: [u8; N] = [0; N];
        self.copy_to_slice(&mut data[..]);
        data
    }
}

/// Reads at most `N` bytes, zero-padding the rest.
pub fn get_padded_bytes<const N: usize, B: Buf>(buffer: &mut B) -> [u8; N] {
    let mut data: [u8; N] = [0; N];
    let length = buffer.remaining().min(N);
    buffer.copy_to_slice(&mut data[..length]);
    data
}

/// Length of `bytes` without trailing NUL padding.
pub fn trimmed_length(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .rposition(|byte| *byte != 0)
        .map_or(0, |index| index + 1)
}
