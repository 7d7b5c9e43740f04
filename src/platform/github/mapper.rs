use crate::platform::types;

/// Map an octocrab pull request plus its conversation into [`types::PullRequestInfo`].
pub fn map_pull_request(
    pr: &octocrab::models::pulls::PullRequest,
    comments: Vec<octocrab::models::issues::Comment>,
) -> types::PullRequestInfo {
    types::PullRequestInfo {
        number: pr.number,
        title: pr.title.clone().unwrap_or_default(),
        body: pr.body.clone().unwrap_or_default(),
        head_ref_name: pr.head.ref_field.clone(),
        base_ref_name: pr.base.ref_field.clone(),
        url: pr
            .html_url
            .as_ref()
            .map(|u| u.to_string())
            .unwrap_or_default(),
        comments: comments.into_iter().map(map_comment).collect(),
    }
}

fn map_comment(comment: octocrab::models::issues::Comment) -> types::Comment {
    types::Comment {
        author: comment.user.login,
        body: comment.body.unwrap_or_default(),
        created_at: comment.created_at,
    }
}
