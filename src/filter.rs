/// Post filter module
///
/// Drops retweets and posts at or before the cutoff timestamp. Both filters
/// are independent and composable; the cutoff comparison is plain string
/// comparison, valid because the timestamp format is fixed-width and
/// zero-padded.

use crate::extractor::NormalizedPost;

/// Filter a batch of posts down to the "new" subsequence.
///
/// `cutoff` is exclusive: only posts strictly newer survive. No cutoff
/// keeps everything on the time axis.
pub fn filter_posts(
    posts: Vec<NormalizedPost>,
    cutoff: Option<&str>,
    exclude_retweets: bool,
) -> Vec<NormalizedPost> {
    posts
        .into_iter()
        .filter(|post| !(exclude_retweets && post.is_retweet))
        .filter(|post| match cutoff {
            Some(cutoff) => post.created_at.as_str() > cutoff,
            None => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(id: &str, created_at: &str, is_retweet: bool) -> NormalizedPost {
        NormalizedPost {
            id: id.to_string(),
            text: format!("post {}", id),
            original_text: None,
            is_quote: false,
            is_retweet,
            created_at: created_at.to_string(),
            media: Vec::new(),
        }
    }

    fn ids(posts: &[NormalizedPost]) -> Vec<&str> {
        posts.iter().map(|p| p.id.as_str()).collect()
    }

    #[test]
    fn cutoff_is_strictly_exclusive() {
        let posts = vec![
            post("older", "2024-01-01-09-00-00", false),
            post("equal", "2024-01-01-10-00-00", false),
            post("newer", "2024-01-01-10-00-01", false),
        ];

        let kept = filter_posts(posts, Some("2024-01-01-10-00-00"), false);
        assert_eq!(ids(&kept), vec!["newer"]);
    }

    #[test]
    fn no_cutoff_keeps_everything() {
        let posts = vec![
            post("a", "2020-01-01-00-00-00", false),
            post("b", "2024-01-01-00-00-00", false),
        ];

        let kept = filter_posts(posts, None, false);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn exclude_retweets_drops_all_retweets_and_only_retweets() {
        let posts = vec![
            post("rt", "2024-01-01-10-00-00", true),
            post("plain", "2024-01-01-10-00-00", false),
        ];

        let kept = filter_posts(posts.clone(), None, true);
        assert_eq!(ids(&kept), vec!["plain"]);

        let kept = filter_posts(posts, None, false);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn filter_is_idempotent() {
        let posts = vec![
            post("a", "2024-01-01-09-00-00", false),
            post("b", "2024-01-01-11-00-00", true),
            post("c", "2024-01-01-12-00-00", false),
        ];

        let once = filter_posts(posts, Some("2024-01-01-10-00-00"), true);
        let twice = filter_posts(once.clone(), Some("2024-01-01-10-00-00"), true);
        assert_eq!(ids(&once), ids(&twice));
    }
}
