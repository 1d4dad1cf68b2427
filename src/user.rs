//! Types for working with users and groups.

use crate::{
    error::{Error, Result},
    options::Value,
};

use nix::{
    libc::{gid_t, uid_t},
    unistd::{self, Gid, Uid, chown},
};
use std::{
    env,
    fmt::{self, Display, Formatter},
    path::Path,
};

/// A value representing a user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum User {
    Uid(Uid),
    Name(String),
}

impl User {
    /// Looks the user up in the password database.
    ///
    /// # Examples
    ///
    /// ```
    /// use sysdaemon::user::User;
    ///
    /// let user = User::Uid(0.into()).get().unwrap();
    /// assert_eq!(user.name, "root");
    /// ```
    pub fn get(&self) -> Result<unistd::User> {
        match self {
            Self::Uid(uid) => unistd::User::from_uid(*uid),
            Self::Name(name) => unistd::User::from_name(name),
        }
        .map_err(|err| Error::Identity(format!("{self}: {err}")))?
        .ok_or_else(|| Error::Identity(format!("{self} does not exist")))
    }

    /// Returns the numeric ID, looking up names.
    pub fn resolve(&self) -> Result<Uid> {
        match self {
            Self::Uid(uid) => Ok(*uid),
            Self::Name(_) => self.get().map(|user| user.uid),
        }
    }
}

impl Display for User {
    /// Formats the value into a human-readable string.
    ///
    /// # Examples
    ///
    /// ```
    /// use sysdaemon::user::User;
    ///
    /// let user: User = 0.into();
    /// assert_eq!(user.to_string(), "user with ID (0)");
    ///
    /// let user: User = "root".into();
    /// assert_eq!(user.to_string(), "user 'root'");
    /// ```
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uid(uid) => write!(f, "user with ID ({uid})"),
            Self::Name(name) => write!(f, "user '{name}'"),
        }
    }
}

impl From<&str> for User {
    /// Parses the string into a `User`.
    ///
    /// If the string is a number, a value of [`Self::Uid`] is returned.
    /// Otherwise, a value of [`Self::Name`] is returned.
    fn from(value: &str) -> Self {
        match value.parse::<uid_t>().ok() {
            Some(uid) => Self::Uid(uid.into()),
            None => Self::Name(value.into()),
        }
    }
}

impl From<Uid> for User {
    fn from(value: Uid) -> Self {
        Self::Uid(value)
    }
}

impl From<uid_t> for User {
    fn from(value: uid_t) -> Self {
        Self::Uid(value.into())
    }
}

impl TryFrom<&Value> for User {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Self> {
        match value {
            Value::Number(n) => uid_t::try_from(*n)
                .map(Self::from)
                .map_err(|_| Error::Identity(format!("invalid user ID {n}"))),
            Value::Str(s) => Ok(s.as_str().into()),
            other => Err(Error::Identity(format!("{other} is not a user"))),
        }
    }
}

/// A value representing a group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Group {
    Gid(Gid),
    Name(String),
}

impl Group {
    /// Looks the group up in the group database.
    ///
    /// # Examples
    ///
    /// ```
    /// use sysdaemon::user::Group;
    ///
    /// let group = Group::Gid(0.into()).get().unwrap();
    /// assert_eq!(group.name, "root");
    /// ```
    pub fn get(&self) -> Result<unistd::Group> {
        match self {
            Self::Gid(gid) => unistd::Group::from_gid(*gid),
            Self::Name(name) => unistd::Group::from_name(name),
        }
        .map_err(|err| Error::Identity(format!("{self}: {err}")))?
        .ok_or_else(|| Error::Identity(format!("{self} does not exist")))
    }

    /// Returns the numeric ID, looking up names.
    pub fn resolve(&self) -> Result<Gid> {
        match self {
            Self::Gid(gid) => Ok(*gid),
            Self::Name(_) => self.get().map(|group| group.gid),
        }
    }
}

impl Display for Group {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gid(gid) => write!(f, "group with ID ({gid})"),
            Self::Name(name) => write!(f, "group '{name}'"),
        }
    }
}

impl From<&str> for Group {
    fn from(value: &str) -> Self {
        match value.parse::<gid_t>().ok() {
            Some(gid) => Self::Gid(gid.into()),
            None => Self::Name(value.into()),
        }
    }
}

impl From<Gid> for Group {
    fn from(value: Gid) -> Self {
        Self::Gid(value)
    }
}

impl From<gid_t> for Group {
    fn from(value: gid_t) -> Self {
        Self::Gid(value.into())
    }
}

impl TryFrom<&Value> for Group {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Self> {
        match value {
            Value::Number(n) => gid_t::try_from(*n)
                .map(Self::from)
                .map_err(|_| Error::Identity(format!("invalid group ID {n}"))),
            Value::Str(s) => Ok(s.as_str().into()),
            other => Err(Error::Identity(format!("{other} is not a group"))),
        }
    }
}

/// The user and group a daemon runs as.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub uid: Uid,
    pub gid: Gid,
}

impl Identity {
    /// The identity of the running process.
    pub fn current() -> Self {
        Self {
            uid: unistd::getuid(),
            gid: unistd::getgid(),
        }
    }

    /// Resolves a user and group into numeric IDs.
    ///
    /// # Examples
    ///
    /// ```
    /// use sysdaemon::user::{Group, Identity, User};
    ///
    /// let identity = Identity::resolve(&User::from("root"), &Group::from("0")).unwrap();
    /// assert!(identity.uid.is_root());
    /// assert_eq!(identity.gid.as_raw(), 0);
    /// ```
    pub fn resolve(user: &User, group: &Group) -> Result<Self> {
        Ok(Self {
            uid: user.resolve()?,
            gid: group.resolve()?,
        })
    }

    /// Gives `path` to this identity.
    pub fn chown<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        chown(path, Some(self.uid), Some(self.gid)).map_err(|err| {
            Error::Identity(format!(
                "failed to change ownership of '{}' to {}:{}: {err}",
                path.display(),
                self.uid,
                self.gid
            ))
        })
    }

    /// Switches the running process to this identity.
    ///
    /// The group is changed first: once the user is no longer privileged
    /// the group can no longer be changed. When the user has a password
    /// entry, the supplementary group list is set from it and `USER`,
    /// `HOME` and `SHELL` are updated.
    pub fn assume(&self) -> Result<()> {
        let entry = unistd::User::from_uid(self.uid).ok().flatten();

        #[cfg(not(target_vendor = "apple"))]
        if let Some(user) = &entry
            && let Ok(name) = std::ffi::CString::new(user.name.as_str())
        {
            unistd::initgroups(&name, self.gid).map_err(|err| {
                Error::Identity(format!(
                    "failed to set supplementary group list for user '{}': {err}",
                    user.name
                ))
            })?;
        }

        unistd::setgid(self.gid).map_err(|err| {
            Error::Identity(format!("failed to set group to {}: {err}", self.gid))
        })?;

        unistd::setuid(self.uid).map_err(|err| {
            Error::Identity(format!("failed to set user to {}: {err}", self.uid))
        })?;

        if let Some(user) = &entry {
            set_env(user);
        }

        Ok(())
    }
}

fn set_env(user: &unistd::User) {
    unsafe { env::set_var("USER", &user.name) };
    unsafe { env::set_var("HOME", &user.dir) };
    unsafe { env::set_var("SHELL", &user.shell) };
}
