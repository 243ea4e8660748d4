//! Client connection tests against a scripted peer

mod flow_control;
