mod bitbucket;

pub use bitbucket::{pipeline_url, BitbucketClient};
