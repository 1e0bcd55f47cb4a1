//The first three characters of a participant id name its home market (NYKB1001 is a
//NewYork buyer). Nodes never enforce this; it is caller-side convention.
const ROUTES: [(&str, &str, u16); 3] = [
    ("NYK", "NewYork", 8080),
    ("LON", "London", 8081),
    ("TOK", "Tokyo", 8082),
];

pub fn home_market(identity: &str) -> Option<&'static str> {
    let prefix = identity.get(..3)?;
    ROUTES
        .iter()
        .find(|(code, _, _)| *code == prefix)
        .map(|(_, market, _)| *market)
}

pub fn rpc_url(identity: &str) -> Option<String> {
    let prefix = identity.get(..3)?;
    ROUTES
        .iter()
        .find(|(code, _, _)| *code == prefix)
        .map(|(_, _, port)| format!("http://127.0.0.1:{port}"))
}
