mod client;
mod links;
mod types;

pub use client::BitbucketClient;
pub use links::pipeline_url;
