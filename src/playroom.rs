use std::result;

use log::{debug, error, info, trace, warn};
use warp::http;

use crate::auth::{self, SessionId};
use crate::backend::{Backend, InsertError};
use crate::form::{Credentials, Registration};
use crate::session::{Session, Sessions};

pub struct Playroom {
    backend: Backend,
    sessions: Sessions,
}

/// A request whose session carries a logged in user.
#[derive(Debug)]
pub struct Authed {
    user_id: i64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    Internal,
    Invalid(&'static str),
    Unauthorized(&'static str),
    UsernameTaken,
    UnknownGame,
    LoginRequired,
}

pub type Result<T> = result::Result<T, Error>;

const BAD_CREDENTIALS: &str = "invalid username and-or password";

impl Into<http::StatusCode> for Error {
    fn into(self) -> http::StatusCode {
        match self {
            Self::Internal => http::StatusCode::INTERNAL_SERVER_ERROR,
            Self::Invalid(_) => http::StatusCode::FORBIDDEN,
            Self::Unauthorized(_) => http::StatusCode::FORBIDDEN,
            Self::UsernameTaken => http::StatusCode::CONFLICT,
            Self::UnknownGame => http::StatusCode::NOT_FOUND,
            Self::LoginRequired => http::StatusCode::FOUND,
        }
    }
}

impl Error {
    pub fn message(self) -> &'static str {
        match self {
            Self::Internal => "something went wrong",
            Self::Invalid(msg) | Self::Unauthorized(msg) => msg,
            Self::UsernameTaken => "Sorry, username taken.",
            Self::UnknownGame => "unknown game",
            Self::LoginRequired => "login required",
        }
    }
}

impl warp::reject::Reject for Error {}

impl Playroom {
    pub fn new(backend: Backend, sessions: Sessions) -> Self {
        Self { backend, sessions }
    }

    pub async fn register(&self, registration: Registration) -> Result<i64> {
        let Registration {
            username,
            password,
            email,
        } = registration;

        let hash = blocking(move || auth::hash_password(&password)).await?;

        match self.backend.create_user(&username, &hash, &email).await {
            Ok(id) => {
                info!("{username} registered, id {id}");
                Ok(id)
            }
            Err(InsertError::Taken) => {
                warn!("rejecting registration, {username} taken");
                Err(Error::UsernameTaken)
            }
            Err(InsertError::Internal) => {
                error!("couldn't register {username}");
                Err(Error::Internal)
            }
        }
    }

    /// Forgets whatever session the client presented, logged in or not.
    pub async fn clear(&self, session_id: Option<SessionId>) -> Result<()> {
        let Some(session_id) = session_id else {
            return Ok(());
        };

        self.sessions
            .destroy(&session_id)
            .await
            .map(|()| trace!("session {session_id} cleared"))
            .map_err(|()| Error::Internal)
    }

    /// Checks credentials and, on success, issues a new session for the user.
    pub async fn login(&self, credentials: Credentials) -> Result<Session> {
        let Credentials { username, password } = credentials;

        let users = self
            .backend
            .users_named(&username)
            .await
            .map_err(|()| Error::Internal)?;

        let user = match &users[..] {
            [user] => user,
            [] => {
                warn!("rejecting non-existent user {username}");
                return Err(Error::Unauthorized(BAD_CREDENTIALS));
            }
            _ => {
                error!("multiple users found for {username}");
                return Err(Error::Unauthorized(BAD_CREDENTIALS));
            }
        };

        let hash = user.hash.clone();
        if !blocking(move || Ok(auth::verify_password(&hash, &password))).await? {
            warn!("wrong password for user {username}");
            return Err(Error::Unauthorized(BAD_CREDENTIALS));
        }

        let mut session = Session::fresh();
        session.set_user(user.id);

        self.sessions.save(&session).await.map_err(|()| {
            error!("couldn't store session for {username}");
            Error::Internal
        })?;

        info!("{} login: new session created", user.username);
        Ok(session)
    }

    pub async fn logout(&self, session_id: Option<SessionId>) -> Result<()> {
        if let Some(ref id) = session_id {
            info!("session {id} logout");
        }
        self.clear(session_id).await
    }

    pub async fn authenticate(&self, session_id: Option<SessionId>) -> Result<Authed> {
        let session = self
            .sessions
            .load(session_id)
            .await
            .map_err(|()| Error::Internal)?;

        match session.user_id() {
            Some(user_id) => {
                trace!("session {} belongs to user {user_id}", session.id());
                Ok(Authed { user_id })
            }
            None => {
                debug!("no user in session, login required");
                Err(Error::LoginRequired)
            }
        }
    }

    pub async fn shutdown(&self) {
        self.backend.close().await;

        match self.sessions.close() {
            Ok(()) => info!("sessions removed"),
            Err(e) => error!("couldn't remove sessions: {e:?}"),
        }
    }
}

impl Authed {
    pub fn user_id(&self) -> i64 {
        self.user_id
    }
}

// argon2 is CPU bound, keep it off the async workers
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> result::Result<T, ()> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("password hashing task failed: {e:?}");
            Error::Internal
        })?
        .map_err(|()| Error::Internal)
}
