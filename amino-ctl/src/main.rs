use amino_api::{AuthToken, CommentNode, NestedComments, UserId, Uuid};
use anyhow::Context;

#[derive(structopt::StructOpt)]
struct Opt {
    #[structopt(short, long)]
    host: String,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Create a user
    CreateUser {
        /// Display name
        name: String,

        /// Avatar url
        #[structopt(long)]
        avatar: Option<String>,
    },

    /// Print the comment tree of a post
    Comments {
        post: Uuid,

        /// Number of top-level comments to show
        #[structopt(long, default_value = "100")]
        limit: u32,

        /// Number of top-level comments to skip
        #[structopt(long, default_value = "0")]
        offset: u32,

        #[structopt(long)]
        include_deleted: bool,
    },

    /// Print a comment along with all its replies
    Thread { comment: Uuid },
}

fn admin_token() -> anyhow::Result<AuthToken> {
    let tok =
        std::env::var("ADMIN_TOKEN").context("retrieving ADMIN_TOKEN environment variable")?;
    let tok = Uuid::try_parse(&tok).context("parsing ADMIN_TOKEN as an auth token")?;
    Ok(AuthToken(tok))
}

fn user_token() -> anyhow::Result<Option<AuthToken>> {
    match std::env::var("AMINO_TOKEN") {
        Err(_) => Ok(None),
        Ok(tok) => {
            let tok = Uuid::try_parse(&tok).context("parsing AMINO_TOKEN as an auth token")?;
            Ok(Some(AuthToken(tok)))
        }
    }
}

/// Turns error responses back into the server's `Error`
async fn check(resp: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.bytes().await.context("reading error response body")?;
    match amino_api::Error::parse(&body) {
        Ok(err) => Err(anyhow::Error::new(err).context(format!("server answered {status}"))),
        Err(_) => anyhow::bail!("server answered {status}: {:?}", String::from_utf8_lossy(&body)),
    }
}

fn print_node(node: &CommentNode, indent: usize) {
    let c = &node.comment;
    let mut flags = String::new();
    if c.is_edited {
        flags.push_str(" (edited)");
    }
    if c.is_deleted {
        flags.push_str(" (deleted)");
    }
    println!(
        "{:indent$}- [{}] {} at {}{flags}: {}",
        "",
        c.id.0,
        c.author_name,
        c.created_at.format("%Y-%m-%d %H:%M"),
        c.content,
        indent = indent * 2,
    );
    for r in &node.replies {
        print_node(r, indent + 1);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = <Opt as structopt::StructOpt>::from_args();

    let client = reqwest::Client::new();
    let with_token = |req: reqwest::RequestBuilder| -> anyhow::Result<reqwest::RequestBuilder> {
        Ok(match user_token()? {
            Some(tok) => req.bearer_auth(tok.0),
            None => req,
        })
    };

    match opt.cmd {
        Command::CreateUser { name, avatar } => {
            let id = UserId(Uuid::new_v4());
            let resp = client
                .post(format!("{}/api/admin/create-user", opt.host))
                .json(&amino_api::NewUser::new(id, name, avatar))
                .bearer_auth(admin_token()?.0)
                .send()
                .await?;
            check(resp).await?;
            println!("{}", id.0);
        }
        Command::Comments {
            post,
            limit,
            offset,
            include_deleted,
        } => {
            let req = client
                .get(format!("{}/api/posts/{post}/comments", opt.host))
                .query(&amino_api::ListOptions {
                    include_deleted,
                    limit,
                    offset,
                });
            let resp = with_token(req)?.send().await?;
            let listing: NestedComments = check(resp)
                .await?
                .json()
                .await
                .context("parsing comment listing")?;
            println!(
                "{} comments in total, showing {} threads",
                listing.total_count,
                listing.comments.len()
            );
            for node in &listing.comments {
                print_node(node, 0);
            }
        }
        Command::Thread { comment } => {
            let req = client.get(format!("{}/api/comments/{comment}/thread", opt.host));
            let resp = with_token(req)?.send().await?;
            let thread: CommentNode = check(resp)
                .await?
                .json()
                .await
                .context("parsing comment thread")?;
            print_node(&thread, 0);
        }
    }

    Ok(())
}
