pub mod pages;
pub mod referrals;
pub mod settings;
pub mod users;
