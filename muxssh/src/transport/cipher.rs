/// A negotiated set of encryption and message authentication algorithms
/// for one direction of the transport.
pub trait Cipher: Send {
    /// The block size of the encryption algorithm, packets are aligned on it.
    fn block_size(&self) -> usize {
        8
    }

    /// The size of the message authentication code appended to packets.
    fn mac_size(&self) -> usize {
        0
    }

    /// Encrypt the `buffer` in place, called on whole packets.
    fn encrypt(&mut self, _buffer: &mut [u8]) {}

    /// Decrypt the `buffer` in place, called on consecutive block-aligned chunks of a packet.
    fn decrypt(&mut self, _buffer: &mut [u8]) {}

    /// Compute the message authentication code of the unencrypted `packet`.
    fn sign(&mut self, _seq: u32, _packet: &[u8]) -> Vec<u8> {
        Vec::new()
    }

    /// Verify the message authentication code of the decrypted `packet`.
    fn verify(&mut self, _seq: u32, _packet: &[u8], mac: &[u8]) -> bool {
        mac.is_empty()
    }
}

/// The `none` cipher, with no message authentication.
#[derive(Debug, Default, Clone, Copy)]
pub struct Plain;

impl Cipher for Plain {}

impl<T: Cipher + ?Sized> Cipher for Box<T> {
    fn block_size(&self) -> usize {
        (**self).block_size()
    }

    fn mac_size(&self) -> usize {
        (**self).mac_size()
    }

    fn encrypt(&mut self, buffer: &mut [u8]) {
        (**self).encrypt(buffer)
    }

    fn decrypt(&mut self, buffer: &mut [u8]) {
        (**self).decrypt(buffer)
    }

    fn sign(&mut self, seq: u32, packet: &[u8]) -> Vec<u8> {
        (**self).sign(seq, packet)
    }

    fn verify(&mut self, seq: u32, packet: &[u8], mac: &[u8]) -> bool {
        (**self).verify(seq, packet, mac)
    }
}
