mod actor_api;
mod runtime_loop;
mod support;
