pub mod solana;
pub mod telegram;

pub use solana::SolanaRpc;
pub use telegram::TelegramClient;
