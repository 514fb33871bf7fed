pub mod blob_store;
pub mod chat_llm;
pub mod db;
pub mod gemini;
pub mod image_source;
pub mod memu;
pub mod random;
pub mod recorder;
pub mod reward_cards;
pub mod sst;
pub mod tts;

pub use blob_store::FsBlobStore;
pub use chat_llm::OpenAiChatAdapter;
pub use db::DbAdapter;
pub use gemini::GeminiVisionAdapter;
pub use memu::MemUAdapter;
pub use random::ThreadRandom;
pub use recorder::FrameRecorder;
pub use reward_cards::CatalogueRewardCards;
pub use sst::OpenAiSstAdapter;
pub use tts::{OpenAiTtsAdapter, SpeechSynthesizer};
