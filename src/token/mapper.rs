use crate::error::AuthError;
use crate::settings::{RealmSettings, SettingsError};
use crate::token::info::{TimeUnit, TokenInfo};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Field names of the IdP token-info payload; the IdP schema is not fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapperSettings {
    pub user_field: String,
    pub expires_in_field: String,
    pub expires_in_unit: TimeUnit,
    pub scope_field: String,
}

impl MapperSettings {
    pub fn new(
        user_field: impl Into<String>,
        expires_in_field: impl Into<String>,
        scope_field: impl Into<String>,
    ) -> Self {
        Self {
            user_field: user_field.into(),
            expires_in_field: expires_in_field.into(),
            expires_in_unit: TimeUnit::Seconds,
            scope_field: scope_field.into(),
        }
    }

    #[must_use]
    pub fn expires_in_unit(mut self, unit: TimeUnit) -> Self {
        self.expires_in_unit = unit;
        self
    }

    /// Reads `token-info.field.*`; the three field names are required.
    pub fn from_settings(settings: &RealmSettings) -> Result<Self, SettingsError> {
        Ok(Self {
            user_field: settings.get_required("token-info.field.user")?.to_string(),
            expires_in_field: settings
                .get_required("token-info.field.expires-in")?
                .to_string(),
            expires_in_unit: settings
                .get_parsed_or("token-info.field.expires-in.unit", TimeUnit::Seconds)?,
            scope_field: settings.get_required("token-info.field.scope")?.to_string(),
        })
    }
}

/// Turns a token-info response body into a [`TokenInfo`].
///
/// A missing or mistyped field is reported as [`AuthError::PayloadDecoding`]:
/// for the caller it is the same as an invalid token, for the operator it
/// usually means the configured field names drifted from the IdP payload.
#[derive(Debug, Clone)]
pub struct TokenInfoMapper {
    settings: MapperSettings,
}

impl TokenInfoMapper {
    pub fn new(settings: MapperSettings) -> Self {
        Self { settings }
    }

    pub fn from_settings(settings: &RealmSettings) -> Result<Self, SettingsError> {
        Ok(Self::new(MapperSettings::from_settings(settings)?))
    }

    #[must_use]
    pub fn settings(&self) -> &MapperSettings {
        &self.settings
    }

    pub fn decode(&self, body: &[u8]) -> Result<TokenInfo, AuthError> {
        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| AuthError::payload("<body>", format!("not valid JSON: {e}")))?;
        let Value::Object(fields) = payload else {
            return Err(AuthError::payload("<body>", "not a JSON object"));
        };
        debug!(fields = %field_list(&fields), "decoding token info payload");

        let user_id = self.extract(&fields, &self.settings.user_field, "a string", |v| {
            v.as_str().filter(|s| !s.is_empty()).map(str::to_string)
        })?;
        let expires_in = self.extract(
            &fields,
            &self.settings.expires_in_field,
            "an integer",
            Value::as_i64,
        )?;
        let scopes = self.extract(
            &fields,
            &self.settings.scope_field,
            "an array of strings",
            |v| {
                v.as_array()?
                    .iter()
                    .map(|s| s.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
            },
        )?;

        Ok(TokenInfo::new(
            user_id,
            expires_in,
            self.settings.expires_in_unit,
            scopes,
        ))
    }

    fn extract<T>(
        &self,
        fields: &Map<String, Value>,
        field: &str,
        expected: &str,
        convert: impl Fn(&Value) -> Option<T>,
    ) -> Result<T, AuthError> {
        if let Some(value) = fields.get(field).and_then(&convert) {
            return Ok(value);
        }
        warn!(
            field,
            available = %field_list(fields),
            "cannot extract token info field, is the oauth realm properly configured?"
        );
        let reason = if fields.contains_key(field) {
            format!("expected {expected}")
        } else {
            "missing".to_string()
        };
        Err(AuthError::payload(field, reason))
    }
}

fn field_list(fields: &Map<String, Value>) -> String {
    let names: Vec<&str> = fields.keys().map(String::as_str).collect();
    format!("[{}]", names.join(", "))
}
