use futures_util::future::BoxFuture;

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("storage: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

use async_trait::async_trait;

/// Posts plus their counters. Counter mutations report rows affected so callers can
/// tell a vanished post apart from a successful update.
#[async_trait]
pub trait PostRepo: Send {
    async fn find_by_id(&mut self, id: Id, viewer: Id) -> RepoResult<Post>;
    async fn create(&mut self, new: NewPost) -> RepoResult<Post>;
    async fn increment_likes(&mut self, id: Id) -> RepoResult<u64>;
    async fn decrement_likes(&mut self, id: Id) -> RepoResult<u64>;
    async fn increment_reposts(&mut self, source_id: Id) -> RepoResult<u64>;
    /// Deletes only when `requester` authored the post, in a single statement.
    async fn delete_with_guard(&mut self, id: Id, requester: Id) -> RepoResult<u64>;
    async fn user_posts(&mut self, user_id: Id, page: i64, viewer: Id) -> RepoResult<Vec<Post>>;
    async fn find_by_query(&mut self, query: &PostQuery, page: i64, viewer: Id) -> RepoResult<Vec<Post>>;
}

#[async_trait]
pub trait LikeRepo: Send {
    async fn find_by_ids(&mut self, user_id: Id, post_id: Id) -> RepoResult<Like>;
    async fn create(&mut self, like: Like) -> RepoResult<()>;
    async fn delete(&mut self, user_id: Id, post_id: Id) -> RepoResult<u64>;
}

#[async_trait]
pub trait TagRepo: Send {
    /// Inserts the names that do not exist yet and returns the rows for every name.
    async fn bulk_insert(&mut self, names: &[String]) -> RepoResult<Vec<Tag>>;
    async fn bulk_insert_relation(&mut self, tags: &[Tag], post_id: Id) -> RepoResult<()>;
    async fn find_by_post(&mut self, post_id: Id) -> RepoResult<Vec<Tag>>;
}

/// Repository handles bound to one execution context (a pooled connection or an open
/// transaction). Never shared between units of work.
pub trait Session: Send {
    fn posts(&mut self) -> &mut dyn PostRepo;
    fn likes(&mut self) -> &mut dyn LikeRepo;
    fn tags(&mut self) -> &mut dyn TagRepo;
}

pub trait TxSession: Session {
    fn session(&mut self) -> &mut dyn Session;
    fn commit(self: Box<Self>) -> BoxFuture<'static, RepoResult<()>>;
    fn rollback(self: Box<Self>) -> BoxFuture<'static, RepoResult<()>>;
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Ambient session for reads outside a unit of work.
    async fn session(&self) -> RepoResult<Box<dyn Session>>;
    async fn begin(&self) -> RepoResult<Box<dyn TxSession>>;
}

fn page_offset(page: i64) -> i64 {
    page.max(0) * PAGE_SIZE
}

/// Escapes LIKE metacharacters and wraps the keyword for a substring match.
pub(crate) fn like_pattern(keyword: &str) -> String {
    let mut out = String::with_capacity(keyword.len() + 2);
    out.push('%');
    for c in keyword.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};
    use std::ops::{Deref, DerefMut};
    use std::sync::Arc;
    use tokio::sync::{Mutex, OwnedMutexGuard};

    #[derive(Default, Clone)]
    pub struct State {
        posts: BTreeMap<Id, Post>,
        likes: BTreeSet<(Id, Id)>,            // (user_id, post_id)
        tags: BTreeMap<String, Tag>,
        post_tags: BTreeSet<(Id, Id)>,        // (post_id, tag_id)
        next_post_id: Id,
        next_tag_id: Id,
    }

    /// Single-lock store: a transaction owns the lock and mutates a private copy
    /// that replaces the shared state on commit.
    #[derive(Clone, Default)]
    pub struct InMemStore {
        state: Arc<Mutex<State>>,
    }

    impl InMemStore {
        pub fn new() -> Self { Self::default() }
    }

    pub struct MemTx {
        guard: OwnedMutexGuard<State>,
        work: State,
    }

    impl Deref for MemTx {
        type Target = State;
        fn deref(&self) -> &State { &self.work }
    }

    impl DerefMut for MemTx {
        fn deref_mut(&mut self) -> &mut State { &mut self.work }
    }

    pub struct MemSession<C> { state: C }

    fn viewed(post: &Post, viewer: Id) -> Post {
        Post { own: post.user_id == viewer, ..post.clone() }
    }

    fn newest_first<'a>(posts: impl Iterator<Item = &'a Post>, page: i64, viewer: Id) -> Vec<Post> {
        let mut v: Vec<_> = posts.collect();
        v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        v.into_iter()
            .skip(page_offset(page) as usize)
            .take(PAGE_SIZE as usize)
            .map(|p| viewed(p, viewer))
            .collect()
    }

    fn bump(state: &mut State, id: Id, f: impl FnOnce(&mut Post)) -> u64 {
        match state.posts.get_mut(&id) {
            Some(p) => { f(p); 1 }
            None => 0,
        }
    }

    #[async_trait]
    impl<C> PostRepo for MemSession<C>
    where
        C: DerefMut<Target = State> + Send,
    {
        async fn find_by_id(&mut self, id: Id, viewer: Id) -> RepoResult<Post> {
            self.state.posts.get(&id).map(|p| viewed(p, viewer)).ok_or(RepoError::NotFound)
        }

        async fn create(&mut self, new: NewPost) -> RepoResult<Post> {
            let s = &mut *self.state;
            s.next_post_id += 1;
            let post = Post {
                id: s.next_post_id,
                user_id: new.user_id,
                text: new.text,
                created_at: new.created_at,
                source_id: new.source_id,
                source_user_id: new.source_user_id,
                attachments: new.attachments,
                photo_ratio: new.photo_ratio,
                likes: 0,
                reposts: 0,
                own: true,
            };
            s.posts.insert(post.id, post.clone());
            Ok(post)
        }

        async fn increment_likes(&mut self, id: Id) -> RepoResult<u64> {
            Ok(bump(&mut *self.state, id, |p| p.likes += 1))
        }

        async fn decrement_likes(&mut self, id: Id) -> RepoResult<u64> {
            Ok(bump(&mut *self.state, id, |p| p.likes -= 1))
        }

        async fn increment_reposts(&mut self, source_id: Id) -> RepoResult<u64> {
            Ok(bump(&mut *self.state, source_id, |p| p.reposts += 1))
        }

        async fn delete_with_guard(&mut self, id: Id, requester: Id) -> RepoResult<u64> {
            let s = &mut *self.state;
            if !s.posts.get(&id).is_some_and(|p| p.user_id == requester) {
                return Ok(0);
            }
            s.posts.remove(&id);
            // mirror ON DELETE CASCADE
            s.likes.retain(|(_, post_id)| *post_id != id);
            s.post_tags.retain(|(post_id, _)| *post_id != id);
            Ok(1)
        }

        async fn user_posts(&mut self, user_id: Id, page: i64, viewer: Id) -> RepoResult<Vec<Post>> {
            Ok(newest_first(self.state.posts.values().filter(|p| p.user_id == user_id), page, viewer))
        }

        async fn find_by_query(&mut self, query: &PostQuery, page: i64, viewer: Id) -> RepoResult<Vec<Post>> {
            let s = &*self.state;
            let tag_ids: BTreeSet<Id> = query.tags.iter()
                .filter_map(|name| s.tags.get(name).map(|t| t.id))
                .collect();
            let keywords: Vec<String> = query.keywords.iter().map(|k| k.to_lowercase()).collect();
            let hits = s.posts.values().filter(|p| {
                let tag_ok = query.tags.is_empty()
                    || tag_ids.iter().any(|t| s.post_tags.contains(&(p.id, *t)));
                let text = p.text.to_lowercase();
                tag_ok && keywords.iter().all(|k| text.contains(k.as_str()))
            });
            Ok(newest_first(hits, page, viewer))
        }
    }

    #[async_trait]
    impl<C> LikeRepo for MemSession<C>
    where
        C: DerefMut<Target = State> + Send,
    {
        async fn find_by_ids(&mut self, user_id: Id, post_id: Id) -> RepoResult<Like> {
            if self.state.likes.contains(&(user_id, post_id)) {
                Ok(Like { user_id, post_id })
            } else {
                Err(RepoError::NotFound)
            }
        }

        async fn create(&mut self, like: Like) -> RepoResult<()> {
            let s = &mut *self.state;
            if !s.posts.contains_key(&like.post_id) { return Err(RepoError::NotFound); }
            if !s.likes.insert((like.user_id, like.post_id)) { return Err(RepoError::Conflict); }
            Ok(())
        }

        async fn delete(&mut self, user_id: Id, post_id: Id) -> RepoResult<u64> {
            Ok(self.state.likes.remove(&(user_id, post_id)) as u64)
        }
    }

    #[async_trait]
    impl<C> TagRepo for MemSession<C>
    where
        C: DerefMut<Target = State> + Send,
    {
        async fn bulk_insert(&mut self, names: &[String]) -> RepoResult<Vec<Tag>> {
            let s = &mut *self.state;
            let mut out = Vec::with_capacity(names.len());
            for name in names {
                if !s.tags.contains_key(name) {
                    s.next_tag_id += 1;
                    s.tags.insert(name.clone(), Tag { id: s.next_tag_id, name: name.clone() });
                }
                out.push(s.tags[name].clone());
            }
            Ok(out)
        }

        async fn bulk_insert_relation(&mut self, tags: &[Tag], post_id: Id) -> RepoResult<()> {
            let s = &mut *self.state;
            if !s.posts.contains_key(&post_id) { return Err(RepoError::NotFound); }
            for t in tags {
                s.post_tags.insert((post_id, t.id));
            }
            Ok(())
        }

        async fn find_by_post(&mut self, post_id: Id) -> RepoResult<Vec<Tag>> {
            let s = &*self.state;
            let mut v: Vec<Tag> = s.tags.values()
                .filter(|t| s.post_tags.contains(&(post_id, t.id)))
                .cloned()
                .collect();
            v.sort_by_key(|t| t.id);
            Ok(v)
        }
    }

    impl<C> Session for MemSession<C>
    where
        C: DerefMut<Target = State> + Send,
    {
        fn posts(&mut self) -> &mut dyn PostRepo { self }
        fn likes(&mut self) -> &mut dyn LikeRepo { self }
        fn tags(&mut self) -> &mut dyn TagRepo { self }
    }

    impl TxSession for MemSession<MemTx> {
        fn session(&mut self) -> &mut dyn Session { self }

        fn commit(self: Box<Self>) -> BoxFuture<'static, RepoResult<()>> {
            let MemTx { mut guard, work } = self.state;
            *guard = work;
            Box::pin(async { Ok(()) })
        }

        fn rollback(self: Box<Self>) -> BoxFuture<'static, RepoResult<()>> {
            drop(self);
            Box::pin(async { Ok(()) })
        }
    }

    #[async_trait]
    impl Store for InMemStore {
        async fn session(&self) -> RepoResult<Box<dyn Session>> {
            let guard = self.state.clone().lock_owned().await;
            Ok(Box::new(MemSession { state: guard }))
        }

        async fn begin(&self) -> RepoResult<Box<dyn TxSession>> {
            let guard = self.state.clone().lock_owned().await;
            let work = guard.clone();
            Ok(Box::new(MemSession { state: MemTx { guard, work } }))
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::pool::PoolConnection;
    use sqlx::{PgConnection, PgPool, Postgres, Transaction};
    use std::ops::DerefMut;

    fn map_db(e: sqlx::Error) -> RepoError {
        match &e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some("23505") => RepoError::Conflict,      // unique_violation
                Some("23503") => RepoError::NotFound,      // foreign_key_violation
                _ => RepoError::Internal(e.to_string()),
            },
            _ => RepoError::Internal(e.to_string()),
        }
    }

    #[derive(Clone)]
    pub struct PgStore { pool: PgPool }

    impl PgStore {
        pub fn new(pool: PgPool) -> Self { Self { pool } }
        pub fn pool(&self) -> &PgPool { &self.pool }
    }

    /// Repository session over any Postgres connection: a pooled connection for
    /// ambient reads or a transaction for a unit of work.
    pub struct PgSession<C> { conn: C }

    #[async_trait]
    impl<C> PostRepo for PgSession<C>
    where
        C: DerefMut<Target = PgConnection> + Send,
    {
        async fn find_by_id(&mut self, id: Id, viewer: Id) -> RepoResult<Post> {
            sqlx::query_as::<_, Post>(r#"
                SELECT p.id, p.user_id, p.text, p.created_at, p.source_id, p.source_user_id,
                       p.attachments, p.photo_ratio, p.likes, p.reposts, (p.user_id = $2) AS own
                FROM posts p
                WHERE p.id = $1
            "#)
                .bind(id)
                .bind(viewer)
                .fetch_one(&mut *self.conn).await.map_err(map_db)
        }

        async fn create(&mut self, new: NewPost) -> RepoResult<Post> {
            sqlx::query_as::<_, Post>(r#"
                INSERT INTO posts (user_id, text, created_at, source_id, source_user_id, attachments, photo_ratio)
                VALUES ($1,$2,$3,$4,$5,$6,$7)
                RETURNING id, user_id, text, created_at, source_id, source_user_id,
                          attachments, photo_ratio, likes, reposts, TRUE AS own
            "#)
                .bind(new.user_id)
                .bind(&new.text)
                .bind(new.created_at)
                .bind(new.source_id)
                .bind(new.source_user_id)
                .bind(&new.attachments)
                .bind(new.photo_ratio)
                .fetch_one(&mut *self.conn).await.map_err(map_db)
        }

        async fn increment_likes(&mut self, id: Id) -> RepoResult<u64> {
            let res = sqlx::query("UPDATE posts SET likes = likes + 1 WHERE id = $1")
                .bind(id)
                .execute(&mut *self.conn).await.map_err(map_db)?;
            Ok(res.rows_affected())
        }

        async fn decrement_likes(&mut self, id: Id) -> RepoResult<u64> {
            let res = sqlx::query("UPDATE posts SET likes = likes - 1 WHERE id = $1")
                .bind(id)
                .execute(&mut *self.conn).await.map_err(map_db)?;
            Ok(res.rows_affected())
        }

        async fn increment_reposts(&mut self, source_id: Id) -> RepoResult<u64> {
            let res = sqlx::query("UPDATE posts SET reposts = reposts + 1 WHERE id = $1")
                .bind(source_id)
                .execute(&mut *self.conn).await.map_err(map_db)?;
            Ok(res.rows_affected())
        }

        async fn delete_with_guard(&mut self, id: Id, requester: Id) -> RepoResult<u64> {
            let res = sqlx::query("DELETE FROM posts WHERE id = $1 AND user_id = $2")
                .bind(id)
                .bind(requester)
                .execute(&mut *self.conn).await.map_err(map_db)?;
            Ok(res.rows_affected())
        }

        async fn user_posts(&mut self, user_id: Id, page: i64, viewer: Id) -> RepoResult<Vec<Post>> {
            sqlx::query_as::<_, Post>(r#"
                SELECT p.id, p.user_id, p.text, p.created_at, p.source_id, p.source_user_id,
                       p.attachments, p.photo_ratio, p.likes, p.reposts, (p.user_id = $2) AS own
                FROM posts p
                WHERE p.user_id = $1
                ORDER BY p.created_at DESC, p.id DESC
                LIMIT $3 OFFSET $4
            "#)
                .bind(user_id)
                .bind(viewer)
                .bind(PAGE_SIZE)
                .bind(page_offset(page))
                .fetch_all(&mut *self.conn).await.map_err(map_db)
        }

        async fn find_by_query(&mut self, query: &PostQuery, page: i64, viewer: Id) -> RepoResult<Vec<Post>> {
            let patterns: Vec<String> = query.keywords.iter().map(|k| like_pattern(k)).collect();
            sqlx::query_as::<_, Post>(r#"
                SELECT p.id, p.user_id, p.text, p.created_at, p.source_id, p.source_user_id,
                       p.attachments, p.photo_ratio, p.likes, p.reposts, (p.user_id = $1) AS own
                FROM posts p
                WHERE (cardinality($2::text[]) = 0 OR EXISTS (
                          SELECT 1 FROM post_tags pt JOIN tags t ON t.id = pt.tag_id
                          WHERE pt.post_id = p.id AND t.name = ANY($2)))
                  AND NOT EXISTS (
                          SELECT 1 FROM unnest($3::text[]) AS k(pattern)
                          WHERE p.text NOT ILIKE k.pattern ESCAPE '\')
                ORDER BY p.created_at DESC, p.id DESC
                LIMIT $4 OFFSET $5
            "#)
                .bind(viewer)
                .bind(&query.tags)
                .bind(&patterns)
                .bind(PAGE_SIZE)
                .bind(page_offset(page))
                .fetch_all(&mut *self.conn).await.map_err(map_db)
        }
    }

    #[async_trait]
    impl<C> LikeRepo for PgSession<C>
    where
        C: DerefMut<Target = PgConnection> + Send,
    {
        async fn find_by_ids(&mut self, user_id: Id, post_id: Id) -> RepoResult<Like> {
            sqlx::query_as::<_, Like>("SELECT user_id, post_id FROM likes WHERE user_id = $1 AND post_id = $2")
                .bind(user_id)
                .bind(post_id)
                .fetch_one(&mut *self.conn).await.map_err(map_db)
        }

        async fn create(&mut self, like: Like) -> RepoResult<()> {
            sqlx::query("INSERT INTO likes (user_id, post_id) VALUES ($1,$2)")
                .bind(like.user_id)
                .bind(like.post_id)
                .execute(&mut *self.conn).await.map_err(map_db)?;
            Ok(())
        }

        async fn delete(&mut self, user_id: Id, post_id: Id) -> RepoResult<u64> {
            let res = sqlx::query("DELETE FROM likes WHERE user_id = $1 AND post_id = $2")
                .bind(user_id)
                .bind(post_id)
                .execute(&mut *self.conn).await.map_err(map_db)?;
            Ok(res.rows_affected())
        }
    }

    #[async_trait]
    impl<C> TagRepo for PgSession<C>
    where
        C: DerefMut<Target = PgConnection> + Send,
    {
        async fn bulk_insert(&mut self, names: &[String]) -> RepoResult<Vec<Tag>> {
            // sorted so concurrent inserts of overlapping names take locks in the same order
            sqlx::query(r#"
                INSERT INTO tags (name)
                SELECT name FROM unnest($1::text[]) AS name ORDER BY name
                ON CONFLICT (name) DO NOTHING
            "#)
                .bind(names)
                .execute(&mut *self.conn).await.map_err(map_db)?;
            // rows committed by a concurrent writer are visible here under READ COMMITTED
            sqlx::query_as::<_, Tag>("SELECT id, name FROM tags WHERE name = ANY($1) ORDER BY id")
                .bind(names)
                .fetch_all(&mut *self.conn).await.map_err(map_db)
        }

        async fn bulk_insert_relation(&mut self, tags: &[Tag], post_id: Id) -> RepoResult<()> {
            let ids: Vec<Id> = tags.iter().map(|t| t.id).collect();
            sqlx::query(r#"
                INSERT INTO post_tags (post_id, tag_id)
                SELECT $1, tag_id FROM unnest($2::bigint[]) AS tag_id
                ON CONFLICT DO NOTHING
            "#)
                .bind(post_id)
                .bind(&ids)
                .execute(&mut *self.conn).await.map_err(map_db)?;
            Ok(())
        }

        async fn find_by_post(&mut self, post_id: Id) -> RepoResult<Vec<Tag>> {
            sqlx::query_as::<_, Tag>(r#"
                SELECT t.id, t.name FROM tags t
                JOIN post_tags pt ON pt.tag_id = t.id
                WHERE pt.post_id = $1
                ORDER BY t.id
            "#)
                .bind(post_id)
                .fetch_all(&mut *self.conn).await.map_err(map_db)
        }
    }

    impl<C> Session for PgSession<C>
    where
        C: DerefMut<Target = PgConnection> + Send,
    {
        fn posts(&mut self) -> &mut dyn PostRepo { self }
        fn likes(&mut self) -> &mut dyn LikeRepo { self }
        fn tags(&mut self) -> &mut dyn TagRepo { self }
    }

    impl TxSession for PgSession<Transaction<'static, Postgres>> {
        fn session(&mut self) -> &mut dyn Session { self }

        fn commit(self: Box<Self>) -> BoxFuture<'static, RepoResult<()>> {
            let PgSession { conn } = *self;
            Box::pin(async move { conn.commit().await.map_err(map_db) })
        }

        fn rollback(self: Box<Self>) -> BoxFuture<'static, RepoResult<()>> {
            let PgSession { conn } = *self;
            Box::pin(async move { conn.rollback().await.map_err(map_db) })
        }
    }

    #[async_trait]
    impl Store for PgStore {
        async fn session(&self) -> RepoResult<Box<dyn Session>> {
            let conn: PoolConnection<Postgres> = self.pool.acquire().await.map_err(map_db)?;
            Ok(Box::new(PgSession { conn }))
        }

        async fn begin(&self) -> RepoResult<Box<dyn TxSession>> {
            let conn = self.pool.begin().await.map_err(map_db)?;
            Ok(Box::new(PgSession { conn }))
        }
    }
}
