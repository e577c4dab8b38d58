pub(crate) mod web_api_server;
