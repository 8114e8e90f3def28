// fragments.rs — The catalog of security rule fragments.
//
// Fragments are plain text. They are composed by concatenation in a fixed
// order (admin grant, required grant, helper functions) and inserted into an
// existing rules document by the merger, or wrapped in the START/END template
// when no rules document exists yet.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::normalize::{haystack_contains, normalize_whitespace};

/// Collection that holds the application's own configuration documents.
pub const DEFAULT_CONFIG_COLLECTION: &str = "_settings_";

/// Placeholder replaced with the configuration collection name.
const CONFIG_PLACEHOLDER: &str = "$CONFIG";

/// Opening of a brand-new rules document. Ends inside the documents scope.
pub const RULES_START: &str = r#"rules_version = '2';

service cloud.firestore {
  match /databases/{database}/documents {"#;

/// Closing of a brand-new rules document.
pub const RULES_END: &str = r#"
  }
}
"#;

/// Optional grant: admins may read and write every document.
pub const ADMIN_GRANT: &str = r#"
    // Allow admins to read and write all documents
    match /{document=**} {
      allow read, write: if hasAnyRole(["ADMIN", "OWNER"]);
    }"#;

/// Grants the application needs on its configuration collection.
const REQUIRED_GRANT_TEMPLATE: &str = r#"
    // Allow users with a role to read the app configuration
    match /$CONFIG/{docId} {
      allow read: if request.auth.token.roles.size() > 0;
      allow write: if hasAnyRole(["ADMIN", "OWNER"]);
      match /{document=**} {
        allow read: if request.auth.token.roles.size() > 0;
        allow write: if hasAnyRole(["ADMIN", "OWNER"]);
      }
    }
    // Allow users to manage their own settings
    match /$CONFIG/userManagement/users/{userId} {
      allow get, update, delete: if isDocOwner(userId);
      allow create: if request.auth.token.roles.size() > 0;
    }"#;

/// Helper functions referenced by the grants.
///
/// Function bodies must not contain `}` before their closing brace: helper
/// de-duplication removes `function <name>` up to the first `}`.
pub const HELPER_FUNCTIONS: &str = r#"
    // Utility functions
    function isDocOwner(docId) {
      return request.auth != null && (request.auth.uid == resource.id || request.auth.uid == docId);
    }
    function hasAnyRole(roles) {
      return request.auth != null && request.auth.token.roles.hasAny(roles);
    }"#;

/// Names of the functions defined in [`HELPER_FUNCTIONS`].
pub const HELPER_NAMES: &[&str] = &["isDocOwner", "hasAnyRole"];

/// The "test mode" catch-all rule that lets anyone read and write anything.
pub const INSECURE_CATCH_ALL: &str = r#"
    match /{document=**} {
      allow read, write: if true;
    }"#;

/// Stable identifier for a fragment in the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FragmentName {
    AdminGrant,
    RequiredGrant,
    HelperFunctions,
    InsecureCatchAll,
}

impl fmt::Display for FragmentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FragmentName::AdminGrant => write!(f, "admin-grant"),
            FragmentName::RequiredGrant => write!(f, "required-grant"),
            FragmentName::HelperFunctions => write!(f, "helper-functions"),
            FragmentName::InsecureCatchAll => write!(f, "insecure-catch-all"),
        }
    }
}

/// Which optional fragments the caller wants inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentSelection {
    /// Insert the admin read/write grant. On by default.
    #[serde(default = "default_include_admin_grant")]
    pub include_admin_grant: bool,
}

impl Default for FragmentSelection {
    fn default() -> Self {
        Self {
            include_admin_grant: default_include_admin_grant(),
        }
    }
}

fn default_include_admin_grant() -> bool {
    true
}

/// The set of fragments one reconciliation works with.
///
/// Owned so that callers can pass their own base fragments into a workflow
/// instead of relying on the built-in constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentLibrary {
    pub wrapper_start: String,
    pub wrapper_end: String,
    pub admin_grant: String,
    pub required_grant: String,
    pub helper_functions: String,
    pub insecure_catch_all: String,
    /// Function names defined in `helper_functions`.
    pub helper_names: Vec<String>,
}

impl FragmentLibrary {
    /// The standard library with `collection` as the configuration collection.
    pub fn for_config_collection(collection: &str) -> Self {
        Self {
            wrapper_start: RULES_START.to_string(),
            wrapper_end: RULES_END.to_string(),
            admin_grant: ADMIN_GRANT.to_string(),
            required_grant: REQUIRED_GRANT_TEMPLATE.replace(CONFIG_PLACEHOLDER, collection),
            helper_functions: HELPER_FUNCTIONS.to_string(),
            insecure_catch_all: INSECURE_CATCH_ALL.to_string(),
            helper_names: HELPER_NAMES.iter().map(|n| n.to_string()).collect(),
        }
    }

    /// Text of a named fragment.
    pub fn get(&self, name: FragmentName) -> &str {
        match name {
            FragmentName::AdminGrant => &self.admin_grant,
            FragmentName::RequiredGrant => &self.required_grant,
            FragmentName::HelperFunctions => &self.helper_functions,
            FragmentName::InsecureCatchAll => &self.insecure_catch_all,
        }
    }

    /// Selected fragments in insertion order.
    pub fn selected(&self, selection: FragmentSelection) -> Vec<FragmentName> {
        let mut names = Vec::with_capacity(3);
        if selection.include_admin_grant {
            names.push(FragmentName::AdminGrant);
        }
        names.push(FragmentName::RequiredGrant);
        names.push(FragmentName::HelperFunctions);
        names
    }

    /// `adminGrant? + requiredGrant + helperFunctions`.
    ///
    /// This is also the text offered for manual setup in a rules console.
    pub fn compose(&self, selection: FragmentSelection) -> String {
        self.selected(selection)
            .into_iter()
            .map(|name| self.get(name))
            .collect()
    }

    /// A complete rules document for a project that has none.
    pub fn bootstrap_document(&self, selection: FragmentSelection) -> String {
        format!(
            "{}{}{}",
            self.wrapper_start,
            self.compose(selection),
            self.wrapper_end
        )
    }

    /// Signature substrings used to detect existing helper definitions.
    pub fn helper_signatures(&self) -> impl Iterator<Item = (&str, String)> + '_ {
        self.helper_names
            .iter()
            .map(|name| (name.as_str(), format!("function {name}")))
    }

    /// Required fragments absent from `live`, compared after whitespace
    /// normalization. An empty result means the live rules grant what the
    /// application needs.
    pub fn missing_required(&self, live: &str) -> Vec<FragmentName> {
        let live = normalize_whitespace(live);
        [FragmentName::RequiredGrant, FragmentName::HelperFunctions]
            .into_iter()
            .filter(|name| !haystack_contains(&live, self.get(*name)))
            .collect()
    }
}

impl Default for FragmentLibrary {
    fn default() -> Self {
        Self::for_config_collection(DEFAULT_CONFIG_COLLECTION)
    }
}
