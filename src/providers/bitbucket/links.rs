/// Builds the Bitbucket web URL for one pipeline's results page.
///
/// Always points at Bitbucket Cloud: the results pages live under the
/// `bitbucket.org` pipelines addon regardless of which API `base-url` the
/// client talks to, and Bitbucket Server installations have no equivalent
/// of this URL scheme.
pub fn pipeline_url(workspace: &str, repository: &str, pipeline_number: u64) -> String {
    format!(
        "https://bitbucket.org/{workspace}/{repository}/addon/pipelines/home#!/results/{pipeline_number}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_url_format() {
        assert_eq!(
            pipeline_url("acme", "widgets", 417),
            "https://bitbucket.org/acme/widgets/addon/pipelines/home#!/results/417"
        );
    }
}
