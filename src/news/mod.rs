pub mod fetch;
pub mod pipeline;

pub use fetch::{HotNewsFetcher, ScrapedArticle};
pub use pipeline::{NewsCommentary, NewsPipeline};
