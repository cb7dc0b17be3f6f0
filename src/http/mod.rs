//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, connect info, graceful drain)
//!     → context.rs (request → RequestContext)
//!     → compression.rs (response side: gzip / deflate)
//!     → body.rs (JSON and multipart parsing)
//!     → [security stages]
//!     → static_files.rs (serve from the public root)
//!     → cache.rs (snapshot lookup / store)
//!     → [routes]
//! ```

pub mod body;
pub mod cache;
pub mod compression;
pub mod context;
pub mod server;
pub mod static_files;

pub use body::{FileUploadStage, JsonBodyStage};
pub use cache::{CacheStage, ResponseCache};
pub use compression::{is_compressible, should_compress, CompressPredicate, CompressionStage};
pub use context::{RequestBody, RequestContext, RequestId, UploadedFile, Uploads, X_REQUEST_ID};
pub use server::HttpServer;
pub use static_files::StaticFilesStage;
