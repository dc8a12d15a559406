mod url;

pub use self::url::{
    AliasRecord, DeletionTask, DumpRecord, LongUrl, OriginalUrl, ShortenedEntry, UserUrl,
};
