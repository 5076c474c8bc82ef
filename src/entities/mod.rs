pub mod policy;
pub mod policy_binding;
pub mod policy_rule;
pub mod role;
pub mod user;

pub use policy::Entity as Policy;
pub use policy_binding::Entity as PolicyBinding;
pub use policy_rule::Entity as PolicyRule;
pub use role::Entity as Role;
pub use user::Entity as User;
