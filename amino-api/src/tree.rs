use std::collections::HashMap;

use crate::{Comment, CommentId, CommentNode, Error, PostId, MAX_PAGE_SIZE};

#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct ListOptions {
    /// If true, soft-deleted comments are kept in the tree
    pub include_deleted: bool,

    /// Maximum number of top-level comments to return
    pub limit: u32,

    /// Number of top-level comments to skip
    pub offset: u32,
}

impl Default for ListOptions {
    fn default() -> ListOptions {
        ListOptions {
            include_deleted: false,
            limit: 100,
            offset: 0,
        }
    }
}

impl ListOptions {
    pub fn validate(&self) -> Result<(), Error> {
        if self.limit > MAX_PAGE_SIZE {
            return Err(Error::IntegerOutOfRange(i64::from(self.limit)));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NestedComments {
    /// One page of top-level comments, each with all its replies
    pub comments: Vec<CommentNode>,

    /// Number of comments stored for the post, whatever the filters
    pub total_count: u64,
}

/// Flat rows linked to their parents by index into `slots`
struct Forest {
    slots: Vec<Option<Comment>>,
    children: Vec<Vec<usize>>,
    roots: Vec<usize>,
    dropped: usize,
}

impl Forest {
    /// Rows for which `is_root` holds start a tree. Any other row is attached
    /// to its parent, or dropped if the parent is not among `rows`.
    fn link(rows: Vec<Comment>, is_root: impl Fn(&Comment) -> bool) -> Forest {
        let index = rows
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id, i))
            .collect::<HashMap<CommentId, usize>>();
        let mut children = vec![Vec::new(); rows.len()];
        let mut roots = Vec::new();
        let mut dropped = 0;
        for (i, c) in rows.iter().enumerate() {
            if is_root(c) {
                roots.push(i);
                continue;
            }
            match c.parent_id.and_then(|p| index.get(&p)) {
                Some(&p) => children[p].push(i),
                None => {
                    tracing::trace!(comment = ?c.id, parent = ?c.parent_id, "parent out of scope");
                    dropped += 1;
                }
            }
        }
        Forest {
            slots: rows.into_iter().map(Some).collect(),
            children,
            roots,
            dropped,
        }
    }

    /// Moves the subtrees starting at `roots` out of the forest
    ///
    /// Every non-root row sits in at most one child list, so this visits each
    /// reachable row once, and rows on a parent cycle are never reached.
    fn assemble(mut self, roots: &[usize]) -> Vec<CommentNode> {
        // pre-order, so that parents come before their replies
        let mut order = Vec::with_capacity(self.slots.len());
        let mut stack = roots.to_vec();
        while let Some(i) = stack.pop() {
            order.push(i);
            stack.extend_from_slice(&self.children[i]);
        }

        let mut built = (0..self.slots.len())
            .map(|_| None)
            .collect::<Vec<Option<CommentNode>>>();
        for &i in order.iter().rev() {
            if let Some(comment) = self.slots[i].take() {
                let replies = self.children[i]
                    .iter()
                    .filter_map(|&c| built[c].take())
                    .collect();
                built[i] = Some(CommentNode { comment, replies });
            }
        }
        roots.iter().filter_map(|&r| built[r].take()).collect()
    }
}

/// Builds one page of the comment tree of `post`
///
/// `rows` must be in display order; siblings keep their relative order. Rows
/// whose parent is not part of the filtered set are left out of the tree.
/// `total_count` is passed through untouched.
pub fn build_nested_comments(
    post: PostId,
    rows: Vec<Comment>,
    total_count: u64,
    options: &ListOptions,
) -> NestedComments {
    let rows = rows
        .into_iter()
        .filter(|c| {
            if c.post_id != post {
                tracing::warn!(comment = ?c.id, post = ?c.post_id, expected = ?post, "skipping comment of another post");
                return false;
            }
            options.include_deleted || !c.is_deleted
        })
        .collect::<Vec<_>>();

    let forest = Forest::link(rows, |c| c.parent_id.is_none());
    if forest.dropped > 0 {
        tracing::debug!(?post, dropped = forest.dropped, "comments hidden by their parent");
    }

    let num_roots = forest.roots.len();
    let start = std::cmp::min(options.offset as usize, num_roots);
    let end = std::cmp::min(start.saturating_add(options.limit as usize), num_roots);
    let page = forest.roots[start..end].to_vec();

    NestedComments {
        comments: forest.assemble(&page),
        total_count,
    }
}

/// Builds the subtree starting at comment `root`
///
/// `rows` should hold `root` and all its descendants. Returns `None` iff
/// `root` is not among `rows`.
pub fn build_comment_thread(root: CommentId, rows: Vec<Comment>) -> Option<CommentNode> {
    let forest = Forest::link(rows, |c| c.id == root);
    if forest.dropped > 0 {
        tracing::warn!(
            ?root,
            dropped = forest.dropped,
            "thread rows reference parents outside of the thread"
        );
    }
    let root_idx = *forest.roots.first()?;
    forest.assemble(&[root_idx]).pop()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::TimeZone;

    use super::*;
    use crate::{Time, UserId, Uuid, MAX_DEPTH};

    fn time(n: i64) -> Time {
        chrono::Utc.timestamp_opt(1_600_000_000 + n, 0).unwrap()
    }

    fn comment(post: PostId, id: u128, parent: Option<&Comment>, is_deleted: bool) -> Comment {
        let (depth, path) = match parent {
            None => (0, Vec::new()),
            Some(p) => {
                let mut path = p.path.clone();
                path.push(p.id);
                (p.depth + 1, path)
            }
        };
        Comment {
            id: CommentId(Uuid::from_u128(id)),
            post_id: post,
            author_id: UserId::stub(),
            author_name: String::from("user"),
            author_avatar: None,
            content: format!("comment {id}"),
            created_at: time(id as i64),
            updated_at: time(id as i64),
            is_edited: false,
            is_deleted,
            parent_id: parent.map(|p| p.id),
            depth,
            reply_count: 0,
            position: None,
            path,
        }
    }

    fn cid(id: u128) -> CommentId {
        CommentId(Uuid::from_u128(id))
    }

    fn ids(nodes: &[CommentNode]) -> Vec<CommentId> {
        nodes.iter().map(|n| n.comment.id).collect()
    }

    /// c1 (root), c2 (root), c3 (reply to c1), c4 (reply to c3), c5 (deleted reply to c1)
    fn example_rows(post: PostId) -> Vec<Comment> {
        let c1 = comment(post, 1, None, false);
        let c2 = comment(post, 2, None, false);
        let c3 = comment(post, 3, Some(&c1), false);
        let c4 = comment(post, 4, Some(&c3), false);
        let c5 = comment(post, 5, Some(&c1), true);
        vec![c1, c2, c3, c4, c5]
    }

    #[test]
    fn deleted_replies_are_hidden_by_default() {
        let post = PostId::stub();
        let res = build_nested_comments(post, example_rows(post), 5, &ListOptions::default());
        assert_eq!(res.total_count, 5);
        assert_eq!(ids(&res.comments), vec![cid(1), cid(2)]);
        let c1 = &res.comments[0];
        assert_eq!(ids(&c1.replies), vec![cid(3)]);
        assert_eq!(ids(&c1.replies[0].replies), vec![cid(4)]);
        assert!(res.comments[1].replies.is_empty());
    }

    #[test]
    fn deleted_replies_can_be_requested() {
        let post = PostId::stub();
        let options = ListOptions {
            include_deleted: true,
            ..ListOptions::default()
        };
        let res = build_nested_comments(post, example_rows(post), 5, &options);
        assert_eq!(ids(&res.comments), vec![cid(1), cid(2)]);
        assert_eq!(ids(&res.comments[0].replies), vec![cid(3), cid(5)]);
        assert!(res.comments[0].replies[1].comment.is_deleted);
    }

    #[test]
    fn pagination_only_counts_top_level_comments() {
        let post = PostId::stub();
        let rows = (1..=12).map(|i| comment(post, i, None, false)).collect();
        let options = ListOptions {
            limit: 5,
            offset: 10,
            ..ListOptions::default()
        };
        let res = build_nested_comments(post, rows, 12, &options);
        assert_eq!(ids(&res.comments), vec![cid(11), cid(12)]);
        assert!(res.comments.iter().all(|c| c.replies.is_empty()));
        assert_eq!(res.total_count, 12);
    }

    #[test]
    fn pagination_keeps_whole_subtrees() {
        let post = PostId::stub();
        let mut rows = Vec::new();
        let mut parent = comment(post, 1, None, false);
        rows.push(parent.clone());
        for i in 2..50 {
            let c = comment(post, i, Some(&parent), false);
            rows.push(c.clone());
            parent = c;
        }
        rows.push(comment(post, 100, None, false));
        let options = ListOptions {
            limit: 1,
            ..ListOptions::default()
        };
        let res = build_nested_comments(post, rows, 50, &options);
        assert_eq!(res.comments.len(), 1);
        assert_eq!(res.comments[0].subtree_len(), 49);
    }

    #[test]
    fn offset_past_the_end() {
        let post = PostId::stub();
        let options = ListOptions {
            offset: 1000,
            ..ListOptions::default()
        };
        let res = build_nested_comments(post, example_rows(post), 5, &options);
        assert!(res.comments.is_empty());
        assert_eq!(res.total_count, 5);
    }

    #[test]
    fn replies_to_deleted_comments_are_dropped() {
        let post = PostId::stub();
        let c1 = comment(post, 1, None, false);
        let c3 = comment(post, 3, Some(&c1), true);
        let c4 = comment(post, 4, Some(&c3), false);
        let res = build_nested_comments(post, vec![c1, c3, c4], 3, &ListOptions::default());
        assert_eq!(ids(&res.comments), vec![cid(1)]);
        assert!(res.comments[0].replies.is_empty());
    }

    #[test]
    fn comments_of_other_posts_are_skipped() {
        let post = PostId::stub();
        let other = PostId(Uuid::from_u128(42));
        let rows = vec![comment(post, 1, None, false), comment(other, 2, None, false)];
        let res = build_nested_comments(post, rows, 1, &ListOptions::default());
        assert_eq!(ids(&res.comments), vec![cid(1)]);
    }

    #[test]
    fn parent_cycles_terminate() {
        let post = PostId::stub();
        let root = comment(post, 1, None, false);
        let mut a = comment(post, 2, None, false);
        let mut b = comment(post, 3, None, false);
        a.parent_id = Some(b.id);
        b.parent_id = Some(a.id);
        let mut selfish = comment(post, 4, None, false);
        selfish.parent_id = Some(selfish.id);
        let res = build_nested_comments(post, vec![root, a, b, selfish], 4, &ListOptions::default());
        assert_eq!(ids(&res.comments), vec![cid(1)]);
        assert!(res.comments[0].replies.is_empty());
    }

    #[test]
    fn thread_from_a_reply() {
        let post = PostId::stub();
        let rows = example_rows(post);
        let thread = vec![rows[2].clone(), rows[3].clone()];
        let res = build_comment_thread(cid(3), thread).expect("thread root is present");
        assert_eq!(res.comment.id, cid(3));
        assert_eq!(ids(&res.replies), vec![cid(4)]);
        assert!(res.replies[0].replies.is_empty());
    }

    #[test]
    fn thread_keeps_deleted_comments() {
        let post = PostId::stub();
        let res = build_comment_thread(cid(1), example_rows(post))
            .expect("thread root is present");
        assert_eq!(ids(&res.replies), vec![cid(3), cid(5)]);
    }

    #[test]
    fn thread_not_found() {
        let post = PostId::stub();
        let rows = example_rows(post)[..2].to_vec();
        assert_eq!(build_comment_thread(cid(99), rows), None);
        assert_eq!(build_comment_thread(cid(1), Vec::new()), None);
    }

    #[test]
    fn thread_root_order_in_input_does_not_matter() {
        let post = PostId::stub();
        let rows = example_rows(post);
        let thread = vec![rows[3].clone(), rows[2].clone()];
        let res = build_comment_thread(cid(3), thread).expect("thread root is present");
        assert_eq!(res.subtree_len(), 2);
    }

    /// A single line of `len` comments, each replying to the previous one
    ///
    /// Paths are left empty so that building it stays linear.
    fn chain(post: PostId, len: u128) -> Vec<Comment> {
        (1..=len)
            .map(|id| {
                let mut c = comment(post, id, None, false);
                if id > 1 {
                    c.parent_id = Some(cid(id - 1));
                    c.depth = (id - 1) as i32;
                }
                c
            })
            .collect()
    }

    #[test]
    fn very_deep_chains_build_and_drop() {
        let post = PostId::stub();
        let res = build_nested_comments(post, chain(post, 100_000), 0, &ListOptions::default());
        assert_eq!(res.comments.len(), 1);
        assert_eq!(res.comments[0].subtree_len(), 100_000);
        drop(res);

        let res =
            build_comment_thread(cid(1), chain(post, 100_000)).expect("thread root is present");
        assert_eq!(res.walk().count(), 100_000);
        drop(res);
    }

    #[test]
    fn deepest_allowed_thread_survives_json() {
        let post = PostId::stub();
        let mut rows = vec![comment(post, 1, None, false)];
        for id in 2..=(MAX_DEPTH as u128 + 1) {
            let c = comment(post, id, rows.last(), false);
            rows.push(c);
        }
        assert_eq!(rows.last().map(|c| c.depth), Some(MAX_DEPTH));

        let total = rows.len() as u64;
        let listing = build_nested_comments(post, rows.clone(), total, &ListOptions::default());
        let json = serde_json::to_vec(&listing).unwrap();
        let parsed: NestedComments = serde_json::from_slice(&json).unwrap();
        assert_eq!(parsed, listing);

        let thread = build_comment_thread(cid(1), rows).expect("thread root is present");
        let json = serde_json::to_vec(&thread).unwrap();
        let parsed: CommentNode = serde_json::from_slice(&json).unwrap();
        assert_eq!(parsed, thread);
    }

    #[test]
    fn page_size_is_capped() {
        let mut options = ListOptions {
            limit: MAX_PAGE_SIZE,
            ..ListOptions::default()
        };
        assert_eq!(options.validate(), Ok(()));
        options.limit = MAX_PAGE_SIZE + 1;
        assert_eq!(
            options.validate(),
            Err(Error::IntegerOutOfRange(i64::from(MAX_PAGE_SIZE) + 1))
        );
    }

    /// Each generated row is (parent choice, is_deleted); a row picks an earlier
    /// row as parent unless the choice makes it top-level
    fn gen_rows(post: PostId, shape: &[(u8, bool)]) -> Vec<Comment> {
        let mut rows: Vec<Comment> = Vec::with_capacity(shape.len());
        for (i, &(parent, deleted)) in shape.iter().enumerate() {
            let parent = match (i, parent % 4) {
                (0, _) | (_, 0) => None,
                _ => Some(rows[parent as usize % i].clone()),
            };
            rows.push(comment(post, i as u128 + 1, parent.as_ref(), deleted));
        }
        rows
    }

    #[test]
    fn tree_properties() {
        bolero::check!()
            .with_type::<(Vec<(u8, bool)>, bool, u8, u8)>()
            .cloned()
            .for_each(|(shape, include_deleted, limit, offset)| {
                let post = PostId::stub();
                let rows = gen_rows(post, &shape);
                let options = ListOptions {
                    include_deleted,
                    limit: u32::from(limit),
                    offset: u32::from(offset),
                };
                let res = build_nested_comments(post, rows.clone(), 1234, &options);
                assert_eq!(res.total_count, 1234);

                let kept = rows
                    .iter()
                    .filter(|c| include_deleted || !c.is_deleted)
                    .collect::<Vec<_>>();
                let kept_ids = kept.iter().map(|c| c.id).collect::<HashSet<_>>();

                // root pagination
                let num_roots = kept.iter().filter(|c| c.parent_id.is_none()).count();
                let expected =
                    std::cmp::min(limit as usize, num_roots.saturating_sub(offset as usize));
                assert_eq!(res.comments.len(), expected);
                let expected_roots = kept
                    .iter()
                    .filter(|c| c.parent_id.is_none())
                    .skip(offset as usize)
                    .take(limit as usize)
                    .map(|c| c.id)
                    .collect::<Vec<_>>();
                assert_eq!(ids(&res.comments), expected_roots);

                for root in &res.comments {
                    assert_eq!(root.comment.depth, 0);
                    assert!(root.comment.path.is_empty());
                    for n in root.walk() {
                        // deleted filtering
                        assert!(include_deleted || !n.comment.is_deleted);
                        // tree shape, in input order
                        let expected_replies = kept
                            .iter()
                            .filter(|c| c.parent_id == Some(n.comment.id))
                            .map(|c| c.id)
                            .collect::<Vec<_>>();
                        assert_eq!(ids(&n.replies), expected_replies);
                        for r in &n.replies {
                            assert_eq!(r.comment.depth, n.comment.depth + 1);
                            let mut path = n.comment.path.clone();
                            path.push(n.comment.id);
                            assert_eq!(r.comment.path, path);
                        }
                    }
                }

                // with every root on the page, exactly the rows with no
                // filtered-out ancestor make it into the tree
                let all = ListOptions {
                    include_deleted,
                    limit: MAX_PAGE_SIZE,
                    offset: 0,
                };
                let res = build_nested_comments(post, rows.clone(), 0, &all);
                let mut seen = res
                    .comments
                    .iter()
                    .flat_map(|r| r.walk())
                    .map(|n| n.comment.id)
                    .collect::<Vec<_>>();
                seen.sort();
                let mut visible = kept
                    .iter()
                    .filter(|c| c.path.iter().all(|p| kept_ids.contains(p)))
                    .map(|c| c.id)
                    .collect::<Vec<_>>();
                visible.sort();
                assert_eq!(seen, visible);
            });
    }

    #[test]
    fn thread_properties() {
        bolero::check!()
            .with_type::<(Vec<(u8, bool)>, u8)>()
            .cloned()
            .for_each(|(shape, pick)| {
                let post = PostId::stub();
                let rows = gen_rows(post, &shape);
                if rows.is_empty() {
                    assert_eq!(build_comment_thread(cid(1), rows), None);
                    return;
                }
                let root = rows[pick as usize % rows.len()].id;
                let thread = rows
                    .iter()
                    .filter(|c| c.id == root || c.path.contains(&root))
                    .cloned()
                    .collect::<Vec<_>>();
                let len = thread.len();
                let res = build_comment_thread(root, thread).expect("thread root is present");
                assert_eq!(res.comment.id, root);
                assert_eq!(res.subtree_len(), len);
                for n in res.walk() {
                    for r in &n.replies {
                        assert_eq!(r.comment.parent_id, Some(n.comment.id));
                        assert_eq!(r.comment.depth, n.comment.depth + 1);
                    }
                }
            });
    }
}
