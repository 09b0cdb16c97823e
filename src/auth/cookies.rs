use axum_extra::extract::cookie::{Cookie, CookieJar};
use time::Duration as TimeDuration;

use super::tokens::{IssuedTokens, TokenManager};

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

fn session_cookie(name: &'static str, value: String, max_age: TimeDuration, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .path("/")
        .max_age(max_age)
        .build()
}

/// Sets both session cookies with lifetimes matching the token TTLs.
pub fn with_session(jar: CookieJar, tokens: &TokenManager, issued: &IssuedTokens, secure: bool) -> CookieJar {
    jar.add(session_cookie(
        ACCESS_COOKIE,
        issued.access_token.clone(),
        tokens.access_ttl(),
        secure,
    ))
    .add(session_cookie(
        REFRESH_COOKIE,
        issued.refresh_token.clone(),
        tokens.refresh_ttl(),
        secure,
    ))
}

fn removal_cookie(name: &'static str, secure: bool) -> Cookie<'static> {
    let mut cookie = session_cookie(name, String::new(), TimeDuration::ZERO, secure);
    cookie.make_removal();
    cookie
}

/// Emits expired cookies whether or not the request carried them.
pub fn clear_session(jar: CookieJar, secure: bool) -> CookieJar {
    jar.add(removal_cookie(ACCESS_COOKIE, secure))
        .add(removal_cookie(REFRESH_COOKIE, secure))
}
