//! Vesta authorization primitives shared by the controller and its tooling.
//!
//! # Purpose
//! Centralizes the low-level access-control vocabulary (policy rules,
//! subjects, role references), the deterministic binding-name derivation, and
//! a Casbin-backed access evaluator used to check effective permissions.
//!
//! # How it fits
//! The controller derives `ClusterRole`/`RoleBinding` objects from role
//! templates using these types; access review feeds the derived objects back
//! into [`build_enforcer`] to answer "can this user do X here?".
//!
//! # Key invariants
//! - Binding names are `lowercase("{role}-{subject}")` and nothing else.
//! - Subjects are always `User` subjects; role refs always target a `ClusterRole`.
//!
//! # Examples
//! ```rust
//! use vesta_authz::{Subject, binding_name};
//!
//! let subject = Subject::user("Alice");
//! assert_eq!(binding_name("project-member", &subject), "project-member-alice");
//! ```
//!
//! # Common pitfalls
//! - Building binding names by hand instead of calling [`binding_name`] lets
//!   casing drift between the writer and the reader.

mod access;
mod casbin_model;
mod errors;
mod rule;
mod subject;

pub use access::{Grant, RoleRules, build_enforcer, is_allowed};
pub use casbin_model::{casbin_model, casbin_model_string};
pub use errors::{AuthzError, AuthzResult};
pub use rule::PolicyRule;
pub use subject::{RoleRef, RoleRefKind, Subject, SubjectKind, binding_name};
