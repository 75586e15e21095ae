//! JSON API over the blog entities.

use std::future::Future;
use std::sync::Arc;

use awesome_db::{Database, Entity, FindOptions, Repository, Value};
use awesome_web::{
    ApiError, Arguments, Endpoint, HandlerError, Page, Request, Response, Signature,
    get_page_index,
};
use md5::Md5;
use serde_json::json;
use sha1::{Digest, Sha1};
use tracing::info;

use crate::models::{Blog, Comment, User, next_id};

/// Author identity forwarded by the fronting proxy.
pub const USER_ID_HEADER: &str = "X-User-Id";
pub const USER_NAME_HEADER: &str = "X-User-Name";
pub const USER_IMAGE_HEADER: &str = "X-User-Image";

const NEWEST_FIRST: &str = "created_at desc";

/// Repositories shared by every handler.
pub struct AppState {
    pub users: Repository<User>,
    pub blogs: Repository<Blog>,
    pub comments: Repository<Comment>,
}

impl AppState {
    pub fn register(db: &Database) -> awesome_db::Result<Self> {
        Ok(Self {
            users: Repository::register(db)?,
            blogs: Repository::register(db)?,
            comments: Repository::register(db)?,
        })
    }

    pub async fn create_tables(&self) -> awesome_db::Result<()> {
        self.users.create_table().await?;
        self.blogs.create_table().await?;
        self.comments.create_table().await
    }
}

struct Author {
    id: String,
    name: String,
    image: String,
}

fn author(request: Option<&Request>) -> Result<Author, ApiError> {
    let request = request.ok_or_else(|| ApiError::permission("Please signin first."))?;
    let id = request
        .header(USER_ID_HEADER)
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::permission("Please signin first."))?;
    Ok(Author {
        id: id.to_string(),
        name: request.header(USER_NAME_HEADER).unwrap_or(id).to_string(),
        image: request.header(USER_IMAGE_HEADER).unwrap_or_default().to_string(),
    })
}

fn required_text(args: &Arguments, field: &str, message: &str) -> Result<String, ApiError> {
    match args.get_str(field).map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(ApiError::value_invalid(field, message)),
    }
}

fn hex<D: Digest>(input: &[u8]) -> String {
    D::digest(input)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

fn is_email_part(ch: char) -> bool {
    ch.is_ascii_lowercase() || ch.is_ascii_digit() || matches!(ch, '-' | '_')
}

/// Lowercase `local@domain.tld` with two to five domain labels.
fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    let labels: Vec<&str> = domain.split('.').collect();
    !local.is_empty()
        && local.chars().all(|ch| is_email_part(ch) || ch == '.')
        && (2..=5).contains(&labels.len())
        && labels
            .iter()
            .all(|label| !label.is_empty() && label.chars().all(is_email_part))
}

/// Client-side password digest: 40 lowercase hex digits.
fn is_sha1_hex(passwd: &str) -> bool {
    passwd.len() == 40
        && passwd
            .chars()
            .all(|ch| ch.is_ascii_digit() || ('a'..='f').contains(&ch))
}

/// One page of `repository`, newest first.
async fn paged<E: Entity>(
    repository: &Repository<E>,
    args: &Arguments,
) -> Result<(Page, Vec<E>), HandlerError> {
    let page_index = get_page_index(args.get_str("page"));
    let total = repository
        .count("count(id)", None, &[])
        .await?
        .and_then(|count| count.as_i64())
        .unwrap_or_default();
    let page = Page::new(u64::try_from(total).unwrap_or_default(), page_index);
    if page.limit == 0 {
        return Ok((page, Vec::new()));
    }
    let items = repository
        .find_all(
            FindOptions::new()
                .order_by(NEWEST_FIRST)
                .limit((page.offset, page.limit)),
        )
        .await?;
    Ok((page, items))
}

async fn api_users(state: Arc<AppState>, args: Arguments) -> Result<Response, HandlerError> {
    let (page, users) = paged(&state.users, &args).await?;
    let users: Vec<User> = users.into_iter().map(User::masked).collect();
    Response::serialize(&json!({ "page": page, "users": users }))
}

async fn api_register_user(
    state: Arc<AppState>,
    args: Arguments,
) -> Result<Response, HandlerError> {
    let name = required_text(&args, "name", "name cannot be empty.")?;
    let email = args.get_str("email").unwrap_or_default();
    if !is_valid_email(email) {
        return Err(ApiError::value_invalid("email", "Invalid email.").into());
    }
    let passwd = args.get_str("passwd").unwrap_or_default();
    if !is_sha1_hex(passwd) {
        return Err(ApiError::value_invalid("passwd", "Invalid password.").into());
    }
    let taken = state
        .users
        .find_all(
            FindOptions::new()
                .filter("\"email\"=?", vec![Value::from(email)])
                .limit(1u64),
        )
        .await?;
    if !taken.is_empty() {
        return Err(ApiError::new("register:failed", "email", "Email is already in use.").into());
    }

    let id = next_id();
    let mut user = User {
        passwd: Some(hex::<Sha1>(format!("{id}:{passwd}").as_bytes())),
        image: Some(format!(
            "http://www.gravatar.com/avatar/{}?d=mm&s=120",
            hex::<Md5>(email.as_bytes())
        )),
        id: Some(id),
        email: Some(email.to_string()),
        name: Some(name),
        admin: Some(false),
        ..User::default()
    };
    state.users.save(&mut user).await?;
    info!("user registered: {}", user.id.as_deref().unwrap_or_default());
    Response::serialize(&user.masked())
}

async fn api_blogs(state: Arc<AppState>, args: Arguments) -> Result<Response, HandlerError> {
    let (page, blogs) = paged(&state.blogs, &args).await?;
    Response::serialize(&json!({ "page": page, "blogs": blogs }))
}

async fn find_blog(state: &AppState, args: &Arguments) -> Result<Blog, HandlerError> {
    let id = args.get_str("id").unwrap_or_default();
    state
        .blogs
        .find(id)
        .await?
        .ok_or_else(|| ApiError::not_found("blog", format!("Blog {id} not found.")).into())
}

async fn api_get_blog(state: Arc<AppState>, args: Arguments) -> Result<Response, HandlerError> {
    let blog = find_blog(&state, &args).await?;
    Response::serialize(&blog)
}

async fn api_create_blog(state: Arc<AppState>, args: Arguments) -> Result<Response, HandlerError> {
    let author = author(args.request())?;
    let name = required_text(&args, "name", "name cannot be empty.")?;
    let summary = required_text(&args, "summary", "summary cannot be empty.")?;
    let content = required_text(&args, "content", "content cannot be empty.")?;
    let mut blog = Blog {
        user_id: Some(author.id),
        user_name: Some(author.name),
        user_image: Some(author.image),
        name: Some(name),
        summary: Some(summary),
        content: Some(content),
        ..Blog::default()
    };
    state.blogs.save(&mut blog).await?;
    info!("blog created: {}", blog.id.as_deref().unwrap_or_default());
    Response::serialize(&blog)
}

async fn api_delete_blog(state: Arc<AppState>, args: Arguments) -> Result<Response, HandlerError> {
    let author = author(args.request())?;
    let blog = find_blog(&state, &args).await?;
    if blog.user_id.as_deref() != Some(author.id.as_str()) {
        return Err(ApiError::permission("Only the author may delete a blog.").into());
    }
    let comments = state
        .comments
        .find_all(FindOptions::new().filter(
            "\"blog_id\"=?",
            vec![Value::from(blog.id.clone())],
        ))
        .await?;
    for comment in &comments {
        state.comments.remove(comment).await?;
    }
    state.blogs.remove(&blog).await?;
    Ok(Response::json(json!({ "id": blog.id })))
}

async fn api_comments(state: Arc<AppState>, args: Arguments) -> Result<Response, HandlerError> {
    let (page, comments) = paged(&state.comments, &args).await?;
    Response::serialize(&json!({ "page": page, "comments": comments }))
}

async fn api_create_comment(
    state: Arc<AppState>,
    args: Arguments,
) -> Result<Response, HandlerError> {
    let author = author(args.request())?;
    let content = required_text(&args, "content", "content cannot be empty.")?;
    let blog = find_blog(&state, &args).await?;
    let mut comment = Comment {
        blog_id: blog.id,
        user_id: Some(author.id),
        user_name: Some(author.name),
        user_image: Some(author.image),
        content: Some(content),
        ..Comment::default()
    };
    state.comments.save(&mut comment).await?;
    Response::serialize(&comment)
}

/// Adapts a state-taking handler to the router's `Fn(Arguments)` shape.
fn with_state<F, Fut>(
    state: &Arc<AppState>,
    handler: F,
) -> impl Fn(Arguments) -> Fut + Send + Sync + 'static
where
    F: Fn(Arc<AppState>, Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, HandlerError>> + Send + 'static,
{
    let state = Arc::clone(state);
    move |args| handler(Arc::clone(&state), args)
}

pub fn endpoints(state: &Arc<AppState>) -> Vec<Endpoint> {
    vec![
        Endpoint::get(
            "/api/users",
            "api_users",
            Signature::new().optional("page"),
            with_state(state, api_users),
        ),
        Endpoint::post(
            "/api/users",
            "api_register_user",
            Signature::new()
                .keyword("email")
                .keyword("name")
                .keyword("passwd"),
            with_state(state, api_register_user),
        ),
        Endpoint::get(
            "/api/blogs",
            "api_blogs",
            Signature::new().optional("page"),
            with_state(state, api_blogs),
        ),
        Endpoint::get(
            "/api/blogs/{id}",
            "api_get_blog",
            Signature::new().positional("id"),
            with_state(state, api_get_blog),
        ),
        Endpoint::post(
            "/api/blogs",
            "api_create_blog",
            Signature::new()
                .request()
                .keyword("name")
                .keyword("summary")
                .keyword("content"),
            with_state(state, api_create_blog),
        ),
        Endpoint::post(
            "/api/blogs/{id}/delete",
            "api_delete_blog",
            Signature::new().positional("id").request(),
            with_state(state, api_delete_blog),
        ),
        Endpoint::post(
            "/api/blogs/{id}/comments",
            "api_create_comment",
            Signature::new().positional("id").request().keyword("content"),
            with_state(state, api_create_comment),
        ),
        Endpoint::get(
            "/api/comments",
            "api_comments",
            Signature::new().optional("page"),
            with_state(state, api_comments),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shapes() {
        assert!(is_valid_email("ann@example.com"));
        assert!(is_valid_email("a.b-c_d@mail.example.co.uk"));
        assert!(!is_valid_email("Ann@example.com"));
        assert!(!is_valid_email("ann@localhost"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("ann@example..com"));
        assert!(!is_valid_email("ann@a.b.c.d.e.f"));
    }

    #[test]
    fn password_must_be_a_sha1_digest() {
        assert!(is_sha1_hex(&hex::<Sha1>(b"ann@example.com:secret")));
        assert!(!is_sha1_hex("secret"));
        assert!(!is_sha1_hex(&"A".repeat(40)));
    }

    #[test]
    fn digests_render_as_lowercase_hex() {
        assert_eq!(hex::<Sha1>(b"abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
        assert_eq!(hex::<Md5>(b""), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
