use statter_engine::QueryService;

// App state
pub struct AppState {
   pub query: QueryService,
}

impl AppState {
    pub fn new(query: QueryService) -> Self {
        Self { query }
    }
}
