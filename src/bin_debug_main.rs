fn main() {
    let raw = b"GET http://h/rewrite HTTP/1.1\r\nHost: h\r\nUser-Agent: curl/8.0\r\nConnection: keep-alive\r\nProxy-Connection: keep-alive\r\nX-Custom: abc\r\n\r\n";
    match proxy::request::parse_request(raw) {
        proxy::request::ParseOutcome::Complete(ctx) => {
            let out = proxy::request::build_origin_request(&ctx).unwrap();
            println!("{}", String::from_utf8_lossy(&out));
        }
        other => println!("{:?}", other),
    }
}
