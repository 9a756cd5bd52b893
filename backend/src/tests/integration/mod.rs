mod api_actions;
mod api_edges;
mod api_tools;
mod api_workflows;
mod postgres_store;
