//! Cross-module tests exercising the engine the way host surfaces do:
//! through the flow and service layers against a scripted HTTP backend.

mod auth_flow_test;
