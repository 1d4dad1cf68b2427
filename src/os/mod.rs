//! Host operating system detection and autostart script generation.

mod driver;

pub use driver::{Driver, Token};

use std::{
    env, fs,
    path::Path,
    sync::OnceLock,
};

static CURRENT: OnceLock<OsDescriptor> = OnceLock::new();

/// What the host is running.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OsDescriptor {
    /// Kernel family, e.g. `Linux` or `FreeBSD`.
    pub family: String,
    /// Distribution name when one was recognized.
    pub distribution: Option<String>,
    pub version: Option<String>,
}

struct Marker {
    distribution: &'static str,
    file: &'static str,
    /// The marker only counts if the file contains this text.
    contains: Option<&'static str>,
    version: fn(&str) -> Option<String>,
}

// Probed in order; Ubuntu also ships /etc/debian_version.
const MARKERS: &[Marker] = &[
    Marker {
        distribution: "Ubuntu",
        file: "etc/lsb-release",
        contains: Some("DISTRIB_ID=Ubuntu"),
        version: lsb_release,
    },
    Marker {
        distribution: "Debian",
        file: "etc/debian_version",
        contains: None,
        version: first_line,
    },
    Marker {
        distribution: "RedHat",
        file: "etc/redhat-release",
        contains: None,
        version: first_numeric_word,
    },
    Marker {
        distribution: "Arch",
        file: "etc/arch-release",
        contains: None,
        version: |_| None,
    },
    Marker {
        distribution: "Gentoo",
        file: "etc/gentoo-release",
        contains: None,
        version: first_numeric_word,
    },
];

impl OsDescriptor {
    /// The host's descriptor, probed once and cached for the life of the
    /// process.
    pub fn current() -> &'static Self {
        CURRENT.get_or_init(|| Self::probe(Path::new("/"), env::consts::OS))
    }

    /// Probes the filesystem under `root` for distribution markers.
    ///
    /// `os` is a Rust target OS name such as `linux`.
    pub fn probe(root: &Path, os: &str) -> Self {
        let family = family_name(os);

        if os == "linux" {
            for marker in MARKERS {
                let Ok(contents) = fs::read_to_string(root.join(marker.file)) else {
                    continue;
                };

                if marker.contains.is_some_and(|text| !contents.contains(text)) {
                    continue;
                }

                return Self {
                    family,
                    distribution: Some(marker.distribution.to_owned()),
                    version: (marker.version)(&contents),
                };
            }
        }

        Self {
            family,
            distribution: None,
            version: None,
        }
    }

    /// The distribution if known, otherwise the family.
    pub fn name(&self) -> &str {
        self.distribution.as_deref().unwrap_or(&self.family)
    }
}

/// Hosts that autostart scripts can be forged for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Platform {
    Debian,
    Ubuntu,
    RedHat,
    Arch,
    FreeBsd,
}

/// Everything the driver needs to know about one platform.
#[derive(Clone, Copy, Debug)]
pub struct Profile {
    pub skeleton: &'static str,
    pub install_dir: &'static str,
    /// Placeholders substituted into the skeleton, in order.
    pub tokens: &'static [Token],
}

const DEBIAN: Profile = Profile {
    skeleton: include_str!("templates/debian.sh"),
    install_dir: "etc/init.d",
    tokens: &[
        Token::AuthorName,
        Token::AuthorEmail,
        Token::Name,
        Token::BinFile,
        Token::BinName,
        Token::Description,
        Token::PidFile,
    ],
};

impl Platform {
    pub fn from_descriptor(os: &OsDescriptor) -> Option<Self> {
        match (os.family.as_str(), os.distribution.as_deref()) {
            ("Linux", Some("Debian")) => Some(Self::Debian),
            ("Linux", Some("Ubuntu")) => Some(Self::Ubuntu),
            ("Linux", Some("RedHat")) => Some(Self::RedHat),
            ("Linux", Some("Arch")) => Some(Self::Arch),
            ("FreeBSD", _) => Some(Self::FreeBsd),
            _ => None,
        }
    }

    pub fn profile(&self) -> Profile {
        match self {
            Self::Debian | Self::Ubuntu => DEBIAN,
            Self::RedHat => Profile {
                skeleton: include_str!("templates/redhat.sh"),
                install_dir: "etc/init.d",
                tokens: &[
                    Token::AuthorName,
                    Token::AuthorEmail,
                    Token::Name,
                    Token::BinFile,
                    Token::BinName,
                    Token::Description,
                    Token::PidFile,
                    Token::ChkConfig,
                ],
            },
            Self::Arch => Profile {
                skeleton: include_str!("templates/arch.sh"),
                install_dir: "etc/rc.d",
                tokens: &[
                    Token::AuthorName,
                    Token::AuthorEmail,
                    Token::Name,
                    Token::BinFile,
                    Token::Description,
                    Token::PidFile,
                ],
            },
            Self::FreeBsd => Profile {
                skeleton: include_str!("templates/freebsd.sh"),
                install_dir: "usr/local/etc/rc.d",
                tokens: &[
                    Token::AuthorName,
                    Token::AuthorEmail,
                    Token::Name,
                    Token::BinFile,
                    Token::BinName,
                    Token::Description,
                    Token::PidFile,
                ],
            },
        }
    }
}

fn family_name(os: &str) -> String {
    match os {
        "linux" => "Linux",
        "freebsd" => "FreeBSD",
        "openbsd" => "OpenBSD",
        "netbsd" => "NetBSD",
        "macos" => "Darwin",
        other => other,
    }
    .to_owned()
}

fn lsb_release(contents: &str) -> Option<String> {
    contents
        .lines()
        .find_map(|line| line.strip_prefix("DISTRIB_RELEASE="))
        .map(|v| v.trim().trim_matches('"').to_owned())
}

fn first_line(contents: &str) -> Option<String> {
    contents
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
}

fn first_numeric_word(contents: &str) -> Option<String> {
    contents
        .split_whitespace()
        .find(|word| word.starts_with(|c: char| c.is_ascii_digit()))
        .map(str::to_owned)
}
