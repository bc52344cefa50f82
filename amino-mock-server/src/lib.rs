use std::collections::{btree_map, BTreeMap, HashMap};

use amino_api::{
    Comment, CommentId, CommentStore, EditComment, Error, NewComment, NewPost, NewUser, PostId,
    SetPosition, Time, User, UserId, MAX_DEPTH,
};
use async_trait::async_trait;

pub struct MockServer {
    users: BTreeMap<UserId, User>,
    posts: HashMap<PostId, Post>,
    // in insertion order
    comments: Vec<Comment>,
}

#[derive(Debug)]
struct Post {
    author: UserId,
}

impl MockServer {
    pub fn new() -> MockServer {
        MockServer {
            users: BTreeMap::new(),
            posts: HashMap::new(),
            comments: Vec::new(),
        }
    }

    /// Return user number `id`
    pub fn test_get_user(&self, id: usize) -> &User {
        self.users
            .values()
            .nth(id)
            .unwrap_or_else(|| panic!("getting user {id} among {}", self.users.len()))
    }

    /// Return the current number of users
    pub fn test_num_users(&self) -> usize {
        self.users.len()
    }

    /// Return comment number `id`, in insertion order
    pub fn test_get_comment(&self, id: usize) -> &Comment {
        &self.comments[id]
    }

    /// Return the current number of comments, deleted ones included
    pub fn test_num_comments(&self) -> usize {
        self.comments.len()
    }

    pub fn admin_create_user(&mut self, u: NewUser) -> Result<(), Error> {
        u.validate()?;

        if self.users.values().any(|db| db.name == u.name) {
            return Err(Error::NameAlreadyUsed(u.name));
        }

        match self.users.entry(u.id) {
            btree_map::Entry::Occupied(_) => Err(Error::UuidAlreadyUsed(u.id.0)),
            btree_map::Entry::Vacant(entry) => {
                entry.insert(User {
                    id: u.id,
                    name: u.name,
                    avatar: u.avatar,
                });
                Ok(())
            }
        }
    }

    pub fn create_post(&mut self, user: UserId, p: NewPost) -> Result<(), Error> {
        p.validate()?;
        if !self.users.contains_key(&user) {
            return Err(Error::PermissionDenied);
        }
        if self.posts.contains_key(&p.id) {
            return Err(Error::UuidAlreadyUsed(p.id.0));
        }
        self.posts.insert(p.id, Post { author: user });
        Ok(())
    }

    fn find(&self, id: CommentId) -> Option<usize> {
        self.comments.iter().position(|c| c.id == id)
    }

    /// Index of comment `id`, if it exists and is not deleted
    fn find_live(&self, id: CommentId) -> Result<usize, Error> {
        self.find(id)
            .filter(|&i| !self.comments[i].is_deleted)
            .ok_or(Error::CommentNotFound(id))
    }

    pub fn submit_comment(
        &mut self,
        user: UserId,
        post: PostId,
        c: NewComment,
        now: Time,
    ) -> Result<(), Error> {
        c.validate()?;
        let author = self.users.get(&user).ok_or(Error::PermissionDenied)?;
        if !self.posts.contains_key(&post) {
            return Err(Error::PostNotFound(post));
        }
        if self.find(c.id).is_some() {
            return Err(Error::UuidAlreadyUsed(c.id.0));
        }
        let (depth, path, parent_idx) = match c.parent_id {
            None => (0, Vec::new(), None),
            Some(parent_id) => {
                let idx = self
                    .find(parent_id)
                    .filter(|&i| {
                        let p = &self.comments[i];
                        p.post_id == post && !p.is_deleted
                    })
                    .ok_or(Error::ParentNotFound(parent_id))?;
                let parent = &self.comments[idx];
                if parent.depth >= MAX_DEPTH {
                    return Err(Error::ReplyTooDeep(parent_id));
                }
                let mut path = parent.path.clone();
                path.push(parent.id);
                (parent.depth + 1, path, Some(idx))
            }
        };
        let comment = Comment {
            id: c.id,
            post_id: post,
            author_id: user,
            author_name: author.name.clone(),
            author_avatar: author.avatar.clone(),
            content: c.content,
            created_at: now,
            updated_at: now,
            is_edited: false,
            is_deleted: false,
            parent_id: c.parent_id,
            depth,
            reply_count: 0,
            position: None,
            path,
        };
        if let Some(idx) = parent_idx {
            self.comments[idx].reply_count += 1;
        }
        self.comments.push(comment);
        Ok(())
    }

    pub fn edit_comment(
        &mut self,
        user: UserId,
        comment: CommentId,
        e: EditComment,
        now: Time,
    ) -> Result<(), Error> {
        e.validate()?;
        let idx = self.find_live(comment)?;
        let c = &mut self.comments[idx];
        if c.author_id != user {
            return Err(Error::PermissionDenied);
        }
        c.content = e.content;
        c.is_edited = true;
        c.updated_at = now;
        Ok(())
    }

    pub fn delete_comment(
        &mut self,
        user: UserId,
        comment: CommentId,
        now: Time,
    ) -> Result<(), Error> {
        let idx = self.find_live(comment)?;
        let post_author = self.posts.get(&self.comments[idx].post_id).map(|p| p.author);
        let c = &mut self.comments[idx];
        if c.author_id != user && post_author != Some(user) {
            return Err(Error::PermissionDenied);
        }
        c.is_deleted = true;
        c.updated_at = now;
        Ok(())
    }

    pub fn set_position(
        &mut self,
        user: UserId,
        comment: CommentId,
        p: SetPosition,
    ) -> Result<(), Error> {
        let idx = self.find_live(comment)?;
        let post_author = self.posts.get(&self.comments[idx].post_id).map(|p| p.author);
        let c = &mut self.comments[idx];
        if post_author != Some(user) {
            return Err(Error::PermissionDenied);
        }
        if c.depth != 0 {
            return Err(Error::NotRootComment(comment));
        }
        c.position = p.position;
        Ok(())
    }

    /// Refreshes the author display data, like a join at read time would
    fn with_author(&self, mut c: Comment) -> Comment {
        if let Some(u) = self.users.get(&c.author_id) {
            c.author_name = u.name.clone();
            c.author_avatar = u.avatar.clone();
        }
        c
    }
}

impl Default for MockServer {
    fn default() -> MockServer {
        MockServer::new()
    }
}

#[async_trait]
impl CommentStore for MockServer {
    async fn fetch_post_comments(
        &self,
        post: PostId,
        include_deleted: bool,
    ) -> anyhow::Result<Vec<Comment>> {
        let mut res = self
            .comments
            .iter()
            .filter(|c| c.post_id == post && (include_deleted || !c.is_deleted))
            .map(|c| self.with_author(c.clone()))
            .collect::<Vec<_>>();
        res.sort_by_key(|c| (c.created_at, c.position.is_none(), c.position, c.depth, c.id));
        Ok(res)
    }

    async fn count_post_comments(&self, post: PostId) -> anyhow::Result<u64> {
        Ok(self.comments.iter().filter(|c| c.post_id == post).count() as u64)
    }

    async fn fetch_thread_rows(&self, comment: CommentId) -> anyhow::Result<Vec<Comment>> {
        let mut res = self
            .comments
            .iter()
            .filter(|c| c.id == comment || c.path.contains(&comment))
            .map(|c| self.with_author(c.clone()))
            .collect::<Vec<_>>();
        res.sort_by_key(|c| (c.created_at, c.id));
        Ok(res)
    }
}
