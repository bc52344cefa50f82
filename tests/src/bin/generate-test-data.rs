use chrono::{Duration, TimeZone, Utc};
use rand::{seq::SliceRandom, Rng};
use uuid::Uuid;

const NUM_USERS: usize = 5;
const NUM_POSTS: usize = 10;
const NUM_COMMENTS: usize = 600;

const POST_TITLE_LEN: usize = 6;
const POST_WORD_COUNT: usize = 80;
const COMMENT_WORD_COUNT: usize = 25;

/// Chance that a new comment answers an existing one rather than the post
const REPLY_PROBABILITY: f64 = 0.7;
const DELETED_PROBABILITY: f64 = 0.05;
const EDITED_PROBABILITY: f64 = 0.1;
const PINNED_PROBABILITY: f64 = 0.05;

struct Comment {
    id: Uuid,
    post: usize,
    author: Uuid,
    content: String,
    created_at: chrono::DateTime<Utc>,
    edited_after: Option<Duration>,
    is_deleted: bool,
    parent: Option<usize>,
    depth: usize,
    path: Vec<Uuid>,
    reply_count: usize,
    position: Option<i32>,
}

fn gen_n_items(table: &str, n: usize, mut f: impl FnMut(usize) -> String) {
    println!("INSERT INTO {} VALUES", table);
    for i in 0..n {
        if i != 0 {
            println!(",");
        }
        print!("    {}", f(i));
    }
    println!();
    println!("ON CONFLICT DO NOTHING;");
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn main() {
    let mut rng = rand::thread_rng();
    let start = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();

    let users = (0..NUM_USERS).map(|_| Uuid::new_v4()).collect::<Vec<_>>();
    gen_n_items("users", NUM_USERS, |i| {
        let avatar = match rng.gen_bool(0.5) {
            true => quote(&format!("https://example.org/avatars/{}.png", users[i])),
            false => String::from("NULL"),
        };
        format!(
            "('{}', {}, {})",
            users[i],
            quote(&format!("{}{i}", lipsum::lipsum_words(1).to_lowercase())),
            avatar,
        )
    });

    let posts = (0..NUM_POSTS)
        .map(|_| (Uuid::new_v4(), *users.choose(&mut rng).unwrap()))
        .collect::<Vec<_>>();
    gen_n_items("posts", NUM_POSTS, |i| {
        let (id, author) = posts[i];
        format!(
            "('{}', '{}', {}, {}, '{}')",
            id,
            author,
            quote(&lipsum::lipsum_title_with_rng(&mut rng)),
            quote(&lipsum::lipsum_words_with_rng(&mut rng, POST_WORD_COUNT)),
            start,
        )
    });

    // Generated in creation order, so that parents always come first
    let mut comments: Vec<Comment> = Vec::with_capacity(NUM_COMMENTS);
    let mut now = start;
    for _ in 0..NUM_COMMENTS {
        now += Duration::seconds(rng.gen_range(1..3600));
        let post = rng.gen_range(0..NUM_POSTS);
        let candidates = comments
            .iter()
            .enumerate()
            .filter(|(_, c)| c.post == post && !c.is_deleted)
            .map(|(i, _)| i)
            .collect::<Vec<_>>();
        let parent = match rng.gen_bool(REPLY_PROBABILITY) {
            true => candidates.choose(&mut rng).copied(),
            false => None,
        };
        let (depth, path) = match parent {
            None => (0, Vec::new()),
            Some(p) => {
                let mut path = comments[p].path.clone();
                path.push(comments[p].id);
                comments[p].reply_count += 1;
                (comments[p].depth + 1, path)
            }
        };
        let position = (parent.is_none() && rng.gen_bool(PINNED_PROBABILITY))
            .then(|| rng.gen_range(0..10));
        comments.push(Comment {
            id: Uuid::new_v4(),
            post,
            author: *users.choose(&mut rng).unwrap(),
            content: lipsum::lipsum_words_with_rng(&mut rng, COMMENT_WORD_COUNT),
            created_at: now,
            edited_after: rng
                .gen_bool(EDITED_PROBABILITY)
                .then(|| Duration::minutes(rng.gen_range(1..600))),
            is_deleted: rng.gen_bool(DELETED_PROBABILITY),
            parent,
            depth,
            path,
            reply_count: 0,
            position,
        });
    }

    gen_n_items("comments", comments.len(), |i| {
        let c = &comments[i];
        let path = c
            .path
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "('{}', '{}', '{}', {}, '{}', '{}', {}, {}, {}, {}, {}, {}, '{{{}}}')",
            c.id,
            posts[c.post].0,
            c.author,
            quote(&c.content),
            c.created_at,
            c.created_at + c.edited_after.unwrap_or_else(Duration::zero),
            c.edited_after.is_some(),
            c.is_deleted,
            c.parent
                .map(|p| format!("'{}'", comments[p].id))
                .unwrap_or_else(|| String::from("NULL")),
            c.depth,
            c.reply_count,
            c.position
                .map(|p| p.to_string())
                .unwrap_or_else(|| String::from("NULL")),
            path,
        )
    });
}
