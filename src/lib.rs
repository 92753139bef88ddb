pub mod archive;
pub mod config;
pub mod container;
pub mod error;
pub mod integrity;
pub mod io_stream;
pub mod payload;
pub mod polyglot;
pub mod recovery;
pub mod split;

pub use archive::{ArchiveKind, EntryCompression, PackEntry};
pub use container::ContainerTemplate;
pub use error::{PolyglotError, Result};
pub use integrity::{Checksum, HashAlgorithm, IntegrityStatus};
pub use io_stream::reader::{ExtractedPayload, OffsetSource, PolyglotReader, ReaderOptions};
pub use io_stream::writer::{PolyglotFile, PolyglotWriter, WriteReport};
pub use io_stream::{CancelFlag, Progress, ProgressTracker, StreamCopier};
pub use payload::{PayloadInput, PayloadMode, PayloadSource};
pub use polyglot::{create, extract, inspect, verify_parts, CreateOptions, ExtractOptions, PartSelection};
pub use recovery::scanner::{ScanOutcome, ScanResult, Signature};
pub use recovery::RecoveryMetadata;
pub use split::SplitPlan;
