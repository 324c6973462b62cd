mod annotation;
mod candidate;
mod post;
mod source;

pub use annotation::{Annotation, Category};
pub use candidate::{content_hash, Candidate};
pub use post::{Keyword, NewPost, Post, PostKeywordMapping, PostUpdate};
pub use source::FeedSource;
