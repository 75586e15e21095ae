//! Typed entity declarations.

use crate::error::Result;
use crate::schema::{Field, Schema};
use crate::value::Value;

/// A struct mapped onto one table.
///
/// Attributes are `Option`s; `None` means unset, which lets `save` tell a
/// missing value from an explicit one. Implementations are normally generated
/// by [`entity!`](crate::entity!).
pub trait Entity: Default + Send + Sync + 'static {
    const TABLE: &'static str;

    /// `(attribute, Field)` pairs in declaration order.
    fn fields() -> Vec<(&'static str, Field)>;

    /// Current value of `attribute`, `None` when unset.
    fn get(&self, attribute: &str) -> Result<Option<Value>>;

    fn set(&mut self, attribute: &str, value: Value) -> Result<()>;

    fn schema() -> Result<Schema> {
        Schema::build(Self::TABLE, Self::fields())
    }
}

/// Declares an entity struct together with its [`Entity`] implementation.
///
/// ```
/// use awesome_db::{Field, entity};
///
/// entity! {
///     pub struct Tag in "tags" {
///         id: i64 = Field::integer().primary_key(),
///         label: String = Field::string().ddl("varchar(20)"),
///     }
/// }
///
/// let tag = Tag { label: Some("rust".into()), ..Tag::default() };
/// assert_eq!(tag.id, None);
/// ```
///
/// Every attribute type must implement [`FromValue`](crate::FromValue) and
/// convert into [`Value`].
#[macro_export]
macro_rules! entity {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident in $table:literal {
            $(
                $(#[$field_meta:meta])*
                $field:ident : $ty:ty = $decl:expr
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                pub $field: ::std::option::Option<$ty>,
            )+
        }

        impl $crate::Entity for $name {
            const TABLE: &'static str = $table;

            fn fields() -> ::std::vec::Vec<(&'static str, $crate::Field)> {
                ::std::vec![$((::std::stringify!($field), $decl)),+]
            }

            fn get(
                &self,
                attribute: &str,
            ) -> $crate::Result<::std::option::Option<$crate::Value>> {
                match attribute {
                    $(::std::stringify!($field) => {
                        ::std::result::Result::Ok(self.$field.clone().map($crate::Value::from))
                    })+
                    other => ::std::result::Result::Err(
                        $crate::DbError::UnknownAttribute(other.to_string()),
                    ),
                }
            }

            fn set(&mut self, attribute: &str, value: $crate::Value) -> $crate::Result<()> {
                match attribute {
                    $(::std::stringify!($field) => {
                        self.$field = <$ty as $crate::FromValue>::from_value(value).map_err(
                            |message| $crate::DbError::Conversion {
                                attribute: attribute.to_string(),
                                message,
                            },
                        )?;
                    })+
                    other => {
                        return ::std::result::Result::Err(
                            $crate::DbError::UnknownAttribute(other.to_string()),
                        );
                    }
                }
                ::std::result::Result::Ok(())
            }
        }
    };
}
