use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use tempfile::TempDir;

use crate::auth::SessionId;

mod kv;
use kv::KeyValues;

const USER_ID: &str = "user_id";
const EXTENSION: &str = "session";

type Result<T> = std::result::Result<T, ()>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: SessionId,
    user_id: Option<i64>,
}

impl Session {
    /// A new, unauthenticated session. Nothing is stored until it's saved with a user.
    pub fn fresh() -> Self {
        Self {
            id: SessionId::new(),
            user_id: None,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user_id
    }

    pub fn set_user(&mut self, user_id: i64) {
        self.user_id = Some(user_id);
    }
}

enum Root {
    Temp(TempDir),
    Dir(PathBuf),
}

/// Server-side session storage, one `key: value` file per session.
///
/// Sessions only last as long as the store: [`Sessions::close`] removes every
/// session file, and a store created without a directory lives in a private
/// temporary directory.
pub struct Sessions {
    root: Root,
}

impl Sessions {
    pub fn new(dir: Option<&Path>) -> io::Result<Self> {
        let root = match dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                Root::Dir(dir.to_path_buf())
            }
            None => Root::Temp(tempfile::Builder::new().prefix("playroom-sessions").tempdir()?),
        };

        let sessions = Self { root };
        info!("sessions stored in {:?}", sessions.dir());
        Ok(sessions)
    }

    fn dir(&self) -> &Path {
        match &self.root {
            Root::Temp(tmp) => tmp.path(),
            Root::Dir(dir) => dir,
        }
    }

    fn path(&self, id: &SessionId) -> PathBuf {
        self.dir().join(format!("{id}.{EXTENSION}"))
    }

    /// Loads the session named by a client's cookie. Missing or unknown ids
    /// give a fresh session under a newly generated id.
    pub async fn load(&self, id: Option<SessionId>) -> Result<Session> {
        let Some(id) = id else {
            return Ok(Session::fresh());
        };

        let path = self.path(&id);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("unknown session {id}, starting afresh");
                return Ok(Session::fresh());
            }
            Err(e) => {
                error!("open {path:?}: {e:?}");
                return Err(());
            }
        };

        let keyvalues = kv::read(file).map_err(|e| {
            error!("read {path:?}: {e:?}");
        })?;

        let user_id = keyvalues
            .get(USER_ID)
            .map(|v| v.parse::<i64>())
            .transpose()
            .map_err(|e| {
                error!("session {id}: invalid {USER_ID}: {e:?}");
            })?;

        Ok(Session { id, user_id })
    }

    pub async fn save(&self, session: &Session) -> Result<()> {
        let Some(user_id) = session.user_id else {
            return self.destroy(&session.id).await;
        };

        let mut keyvalues = KeyValues::new();
        keyvalues.insert(USER_ID.into(), user_id.to_string());

        let path = self.path(&session.id);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| {
                error!("couldn't open {path:?}: {e:?}");
            })?;

        kv::write(file, &keyvalues).map_err(|e| {
            error!("write {path:?}: {e:?}");
        })
    }

    /// Removing a session that was never stored is not an error.
    pub async fn destroy(&self, id: &SessionId) -> Result<()> {
        let path = self.path(id);

        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("session {id} removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => {
                error!("remove {path:?}: {e:?}");
                Err(())
            }
        }
    }

    /// Removes every stored session. Callable while the store is still shared;
    /// later loads simply find nothing.
    pub fn close(&self) -> io::Result<()> {
        if let Root::Temp(tmp) = &self.root {
            return fs::remove_dir_all(tmp.path());
        }

        for ent in fs::read_dir(self.dir())? {
            let path = ent?.path();

            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Err(e) = fs::remove_file(&path) {
                warn!("couldn't remove {path:?}: {e:?}");
            }
        }
        Ok(())
    }
}
