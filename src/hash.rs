use crate::Sm3Error;

pub trait Hasher<const N: usize>: Default + Clone {
    fn update(&mut self, data: &[u8]) -> Result<(), Sm3Error>;

    fn digest(self) -> Result<[u8; N], Sm3Error>;

    fn digest_message(message: &[u8]) -> Result<[u8; N], Sm3Error> {
        let mut hasher = Self::default();
        hasher.update(message)?;
        hasher.digest()
    }

    fn update_and_digest(mut self, message: &[u8]) -> Result<[u8; N], Sm3Error> {
        self.update(message)?;
        self.digest()
    }
}
