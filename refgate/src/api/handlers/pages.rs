//! Content pages, rendered per viewer.

use axum::{
    extract::{Path, State},
    http::Uri,
    response::Html,
};
use minijinja::{Environment, context};

use crate::{
    AppState,
    api::models::users::CurrentUser,
    errors::Error,
    gate::{GateDecision, decide},
    placeholders,
};

const PAGE_LAYOUT: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>{{ title|e }}</title>
</head>
<body>
    <main class="page page-{{ slug|e }}">
        <h1>{{ title|e }}</h1>
        {% if restricted %}<p class="pending-notice">{{ notice|e }}</p>{% else %}{{ body }}{% endif %}
    </main>
</body>
</html>"#;

/// Render a page
///
/// Referral placeholders are expanded for the caller. Pending callers see the pending notice in
/// place of the content, except on the holding page.
#[utoipa::path(
    get,
    path = "/pages/{slug}",
    tag = "pages",
    params(("slug" = String, Path, description = "Page slug")),
    responses(
        (status = 200, description = "Rendered page", content_type = "text/html"),
        (status = 404, description = "Page not found"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn render_page(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    uri: Uri,
    current_user: Option<CurrentUser>,
) -> Result<Html<String>, Error> {
    let page = state.store.get_page(&slug).await?.ok_or_else(|| Error::NotFound {
        resource: "Page".to_string(),
        id: slug.clone(),
    })?;

    let restricted = decide(current_user.as_ref().map(|u| u.role), uri.path(), &state.config) == GateDecision::Restrict;

    let body = if restricted {
        String::new()
    } else {
        let viewer = match &current_user {
            Some(user) => Some(state.referrals.info(user.id).await?),
            None => None,
        };
        placeholders::expand(&page.body, viewer.as_ref())
    };

    let html = Environment::new()
        .render_str(
            PAGE_LAYOUT,
            context! {
                slug => &page.slug,
                title => &page.title,
                body => &body,
                restricted => restricted,
                notice => &state.config.gate.notice,
            },
        )
        .map_err(|e| Error::Internal {
            operation: format!("render page: {e}"),
        })?;

    Ok(Html(html))
}
