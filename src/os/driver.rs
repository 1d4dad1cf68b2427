use super::{OsDescriptor, Platform, Profile};
use crate::{
    error::{Error, Result},
    options::Options,
};

use nix::unistd::{AccessFlags, access};
use std::{
    borrow::Cow,
    fs::{self, Permissions},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

const SCRIPT_MODE: u32 = 0o755;

/// A placeholder in an autostart skeleton.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Token {
    AuthorName,
    AuthorEmail,
    Name,
    /// Full path of the executable.
    BinFile,
    /// File name of the executable.
    BinName,
    Description,
    PidFile,
    ChkConfig,
}

impl Token {
    pub const ALL: [Token; 8] = [
        Self::AuthorName,
        Self::AuthorEmail,
        Self::Name,
        Self::BinFile,
        Self::BinName,
        Self::Description,
        Self::PidFile,
        Self::ChkConfig,
    ];

    pub fn placeholder(&self) -> &'static str {
        match self {
            Self::AuthorName => "@author_name@",
            Self::AuthorEmail => "@author_email@",
            Self::Name => "@name@",
            Self::BinFile => "@bin_file@",
            Self::BinName => "@bin_name@",
            Self::Description => "@desc@",
            Self::PidFile => "@pid_file@",
            Self::ChkConfig => "@chkconfig@",
        }
    }
}

/// The values substituted into a skeleton.
struct Properties {
    author_name: String,
    author_email: String,
    name: String,
    bin_file: PathBuf,
    bin_name: String,
    description: String,
    pid_file: String,
    chkconfig: String,
}

impl Properties {
    fn gather(options: &Options) -> Result<Self> {
        let require = |name: &str| {
            options
                .get_str(name)
                .filter(|value| !value.is_empty())
                .map(Cow::into_owned)
                .ok_or_else(|| Error::AutoRun(format!("option '{name}' is not set")))
        };

        let app_dir = PathBuf::from(require("appDir")?);
        let bin_name = require("appExecutable")?;
        let name = require("appName")?;

        let props = Self {
            author_name: require("authorName")?,
            author_email: require("authorEmail")?,
            bin_file: app_dir.join(&bin_name),
            bin_name,
            description: require("appDescription")?,
            pid_file: options
                .get_str("appPidLocation")
                .map(Cow::into_owned)
                .unwrap_or_else(|| format!("/var/run/{name}/{name}.pid")),
            chkconfig: options
                .get_str("appChkConfig")
                .map_or_else(|| "- 99 0".to_owned(), Cow::into_owned),
            name,
        };

        let executable = fs::metadata(&props.bin_file)
            .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
            .unwrap_or(false);
        if !executable {
            return Err(Error::AutoRun(format!(
                "'{}' is not an executable file",
                props.bin_file.display()
            )));
        }

        Ok(props)
    }

    fn value(&self, token: Token) -> String {
        match token {
            Token::AuthorName => self.author_name.clone(),
            Token::AuthorEmail => self.author_email.clone(),
            Token::Name => self.name.clone(),
            Token::BinFile => self.bin_file.to_string_lossy().into_owned(),
            Token::BinName => self.bin_name.clone(),
            Token::Description => self.description.clone(),
            Token::PidFile => self.pid_file.clone(),
            Token::ChkConfig => self.chkconfig.clone(),
        }
    }
}

/// Forges and installs autostart scripts for one host.
#[derive(Clone, Debug)]
pub struct Driver {
    os: OsDescriptor,
    root: PathBuf,
}

impl Driver {
    /// A driver for the running host.
    pub fn detect() -> Self {
        Self::new(OsDescriptor::current().clone())
    }

    pub fn new(os: OsDescriptor) -> Self {
        Self {
            os,
            root: PathBuf::from("/"),
        }
    }

    /// Installs under `root` instead of `/`.
    pub fn root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.root = root.into();
        self
    }

    pub fn descriptor(&self) -> &OsDescriptor {
        &self.os
    }

    pub fn platform(&self) -> Result<Platform> {
        Platform::from_descriptor(&self.os).ok_or_else(|| {
            Error::Unsupported(format!(
                "no autostart support for {}",
                self.os.name()
            ))
        })
    }

    fn profile(&self) -> Result<Profile> {
        self.platform().map(|platform| platform.profile())
    }

    /// Where the autostart script for `app_name` is installed.
    pub fn autorun_location(&self, app_name: &str) -> Result<PathBuf> {
        let profile = self.profile()?;
        Ok(self.root.join(profile.install_dir).join(app_name))
    }

    /// Produces the autostart script from the platform skeleton.
    ///
    /// The skeleton can be replaced with the `runTemplateLocation` option.
    pub fn autorun_forge(&self, options: &Options) -> Result<String> {
        let profile = self.profile()?;
        let props = Properties::gather(options)?;

        let skeleton = match options.get_path("runTemplateLocation") {
            Some(path) => fs::read_to_string(&path).map_err(|err| Error::io(&*path, err))?,
            None => profile.skeleton.to_owned(),
        };

        if skeleton.trim().is_empty() {
            return Err(Error::AutoRun("the skeleton script is empty".into()));
        }

        let script = profile
            .tokens
            .iter()
            .fold(skeleton, |script, token| {
                script.replace(token.placeholder(), &props.value(*token))
            });

        if let Some(token) = Token::ALL
            .iter()
            .find(|token| script.contains(token.placeholder()))
        {
            return Err(Error::AutoRun(format!(
                "placeholder {} is not supported on {}",
                token.placeholder(),
                self.os.name()
            )));
        }

        Ok(script)
    }

    /// Forges the autostart script and installs it.
    ///
    /// An existing script is only replaced when `overwrite` is set. Returns
    /// the installed path.
    pub fn write_autorun(&self, options: &Options, overwrite: bool) -> Result<PathBuf> {
        let name = options
            .get_str("appName")
            .ok_or_else(|| Error::AutoRun("option 'appName' is not set".into()))?;
        let path = self.autorun_location(&name)?;

        if path.exists() && !overwrite {
            return Err(Error::AutoRunExists(path));
        }

        let dir = path.parent().unwrap_or(Path::new("/"));
        if !dir.is_dir() || access(dir, AccessFlags::W_OK).is_err() {
            return Err(Error::AutoRun(format!(
                "directory '{}' is not writable",
                dir.display()
            )));
        }

        let script = self.autorun_forge(options)?;

        fs::write(&path, script).map_err(|err| Error::io(&path, err))?;
        fs::set_permissions(&path, Permissions::from_mode(SCRIPT_MODE))
            .map_err(|err| Error::io(&path, err))?;

        Ok(path)
    }
}
