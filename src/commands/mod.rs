pub mod download;
pub mod gui;
pub mod login;
pub mod logout;
pub mod whoami;
