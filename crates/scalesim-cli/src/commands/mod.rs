pub mod erlang;
pub mod run;
pub mod scaffold;
pub mod sweep;
