use crate::{
    options::Value,
    os::OsDescriptor,
    user::{Group, User},
};

use nix::libc::{gid_t, uid_t};
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, Visitor},
    ser::SerializeStruct,
};
use std::fmt::{self, Formatter};

/// Accepts an ID or a name.
struct IdOrName<T>(std::marker::PhantomData<T>);

impl<T> IdOrName<T> {
    fn new() -> Self {
        Self(std::marker::PhantomData)
    }
}

impl Visitor<'_> for IdOrName<User> {
    type Value = User;

    fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("a user ID or name")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<User, E> {
        uid_t::try_from(v).map(User::from).map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<User, E> {
        uid_t::try_from(v).map(User::from).map_err(E::custom)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<User, E> {
        Ok(v.into())
    }
}

impl Visitor<'_> for IdOrName<Group> {
    type Value = Group;

    fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("a group ID or name")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Group, E> {
        gid_t::try_from(v).map(Group::from).map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Group, E> {
        gid_t::try_from(v).map(Group::from).map_err(E::custom)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Group, E> {
        Ok(v.into())
    }
}

impl<'de> Deserialize<'de> for User {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(IdOrName::<User>::new())
    }
}

impl Serialize for User {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Uid(uid) => serializer.serialize_u32(uid.as_raw()),
            Self::Name(name) => serializer.serialize_str(name),
        }
    }
}

impl<'de> Deserialize<'de> for Group {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(IdOrName::<Group>::new())
    }
}

impl Serialize for Group {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Gid(gid) => serializer.serialize_u32(gid.as_raw()),
            Self::Name(name) => serializer.serialize_str(name),
        }
    }
}

struct ValueVisitor;

impl Visitor<'_> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("a boolean, integer or string")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Number(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        i64::try_from(v).map(Value::Number).map_err(E::custom)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::Str(v.into()))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ValueVisitor)
    }
}

impl Serialize for Value {
    /// Objects are opaque and cannot be serialized.
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => serializer.serialize_i64(*n),
            Self::Str(s) => serializer.serialize_str(s),
            Self::Object(_) => Err(serde::ser::Error::custom(
                "object option values cannot be serialized",
            )),
        }
    }
}

impl Serialize for OsDescriptor {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("OsDescriptor", 3)?;
        state.serialize_field("family", &self.family)?;
        state.serialize_field("distribution", &self.distribution)?;
        state.serialize_field("version", &self.version)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_test::{Token, assert_de_tokens, assert_ser_tokens_error, assert_tokens};

    #[test]
    fn user() {
        assert_tokens(&User::from(0), &[Token::U32(0)]);
        assert_tokens(&User::from("root"), &[Token::Str("root")]);
        assert_de_tokens(&User::from(1000), &[Token::I64(1000)]);
    }

    #[test]
    fn group() {
        assert_tokens(&Group::from(0), &[Token::U32(0)]);
        assert_tokens(&Group::from("wheel"), &[Token::Str("wheel")]);
    }

    #[test]
    fn value() {
        assert_tokens(&Value::Bool(true), &[Token::Bool(true)]);
        assert_tokens(&Value::Number(-3), &[Token::I64(-3)]);
        assert_tokens(&Value::from("svc"), &[Token::Str("svc")]);
        assert_de_tokens(&Value::Number(6), &[Token::U8(6)]);
    }

    #[test]
    fn object_value_is_not_serializable() {
        assert_ser_tokens_error(
            &Value::object(42u8),
            &[],
            "object option values cannot be serialized",
        );
    }

    #[test]
    fn os_descriptor() {
        let os = OsDescriptor {
            family: "Linux".into(),
            distribution: Some("Debian".into()),
            version: None,
        };

        serde_test::assert_ser_tokens(
            &os,
            &[
                Token::Struct {
                    name: "OsDescriptor",
                    len: 3,
                },
                Token::Str("family"),
                Token::Str("Linux"),
                Token::Str("distribution"),
                Token::Some,
                Token::Str("Debian"),
                Token::Str("version"),
                Token::None,
                Token::StructEnd,
            ],
        );
    }
}
