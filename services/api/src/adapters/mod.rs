pub mod db;
pub mod gemini;
pub mod jpeg;
pub mod supabase_auth;

pub use db::DbAdapter;
pub use gemini::GeminiAdapter;
pub use jpeg::JpegNormalizer;
pub use supabase_auth::SupabaseAuthAdapter;
