use std::convert::Infallible;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use cookie::{Cookie, SameSite};
use log::{error, info};
use serde::de::DeserializeOwned;
use warp::http::{header, HeaderMap, HeaderValue, StatusCode, Uri};
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

mod args;
mod auth;
mod backend;
mod form;
mod game;
mod playroom;
mod session;
mod templates;
mod user;

use args::Args;
use auth::SessionId;
use backend::Backend;
use form::{Credentials, GameForm, LoginForm, RegisterForm, Registration};
use game::Game;
use playroom::{Authed, Error, Playroom};
use session::{Session, Sessions};

const SESSION_ID: &str = "session";
const FORM_LIMIT: u64 = 16 * 1024;

#[tokio::main]
async fn main() -> ExitCode {
    let filters = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    pretty_env_logger::formatted_timed_builder()
        .parse_filters(&filters)
        .init();

    let args = Args::parse();

    let addr = match args.addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("invalid address: {e}");
            return ExitCode::FAILURE;
        }
    };

    let Ok(backend) = Backend::new(args.data_dir()).await else {
        error!("couldn't open the user database in {:?}", args.data_dir());
        return ExitCode::FAILURE;
    };

    let sessions = match Sessions::new(args.session_dir()) {
        Ok(sessions) => sessions,
        Err(e) => {
            error!("couldn't set up session storage: {e}");
            return ExitCode::FAILURE;
        }
    };

    let playroom = Arc::new(Playroom::new(backend, sessions));
    let routes = routes(
        Arc::clone(&playroom),
        args.secure(),
        args.static_dir().to_path_buf(),
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("couldn't listen for ctrl-c: {e}");
        }
    };

    let (bound, server) = match warp::serve(routes).try_bind_with_graceful_shutdown(addr, shutdown) {
        Ok(bound) => bound,
        Err(e) => {
            error!("couldn't listen on {addr}: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!("listening on {bound}");
    server.await;
    info!("shutting down");

    playroom.shutdown().await;

    ExitCode::SUCCESS
}

fn routes(
    playroom: Arc<Playroom>,
    secure: bool,
    static_dir: PathBuf,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let playroom = warp::any().map(move || Arc::clone(&playroom));
    let secure = warp::any().map(move || secure);

    // a cookie that isn't one of our ids is as good as no cookie
    let session_id = warp::cookie::optional::<String>(SESSION_ID)
        .map(|cookie: Option<String>| cookie.and_then(|c| c.parse::<SessionId>().ok()));

    let authed = playroom
        .clone()
        .and(session_id.clone())
        .and_then(|playroom: Arc<Playroom>, session_id| async move {
            playroom.authenticate(session_id).await.map_err(reject)
        });

    let index = warp::path::end()
        .and(warp::get())
        .and(authed.clone())
        .map(|_: Authed| warp::reply::html(templates::INDEX));

    let login_page = warp::path!("login")
        .and(warp::get())
        .and(playroom.clone())
        .and(session_id.clone())
        .and(secure.clone())
        .and_then(login_page);

    let login = warp::path!("login")
        .and(warp::post())
        .and(form::<LoginForm>())
        .and(playroom.clone())
        .and(session_id.clone())
        .and(secure.clone())
        .and_then(login);

    let logout = warp::path!("logout")
        .and(warp::get())
        .and(playroom.clone())
        .and(session_id.clone())
        .and(secure.clone())
        .and_then(logout);

    let register_page = warp::path!("register")
        .and(warp::get())
        .map(|| warp::reply::html(templates::REGISTER));

    let register = warp::path!("register")
        .and(warp::post())
        .and(form::<RegisterForm>())
        .and(playroom.clone())
        .and_then(register);

    let games = warp::path!("games")
        .and(warp::get())
        .and(authed.clone())
        .map(|_: Authed| warp::reply::html(templates::GAMES));

    let play = warp::path!("games")
        .and(warp::post())
        .and(authed)
        .and(form::<GameForm>())
        .and_then(play);

    let statics = warp::path("static").and(warp::fs::dir(static_dir));

    index
        .or(login_page)
        .or(login)
        .or(logout)
        .or(register_page)
        .or(register)
        .or(games)
        .or(play)
        .or(statics)
        .recover(handle_rejection)
        .with(warp::reply::with::headers(no_cache()))
        .with(warp::log("playroom"))
}

fn form<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: DeserializeOwned + Send + 'static,
{
    warp::body::content_length_limit(FORM_LIMIT).and(warp::body::form())
}

async fn login_page(
    playroom: Arc<Playroom>,
    session_id: Option<SessionId>,
    secure: bool,
) -> Result<Response, Rejection> {
    playroom.clear(session_id).await.map_err(reject)?;

    let page = warp::reply::html(templates::LOGIN).into_response();
    match session_id {
        Some(_) => with_cookie(page, removal_cookie(secure)),
        None => Ok(page),
    }
}

async fn login(
    form: LoginForm,
    playroom: Arc<Playroom>,
    session_id: Option<SessionId>,
    secure: bool,
) -> Result<Response, Rejection> {
    playroom.clear(session_id).await.map_err(reject)?;

    let credentials = Credentials::try_from(form).map_err(reject)?;
    let session = playroom.login(credentials).await.map_err(reject)?;

    with_cookie(redirect("/"), session_cookie(&session, secure))
}

async fn logout(
    playroom: Arc<Playroom>,
    session_id: Option<SessionId>,
    secure: bool,
) -> Result<Response, Rejection> {
    playroom.logout(session_id).await.map_err(reject)?;

    match session_id {
        Some(_) => with_cookie(redirect("/"), removal_cookie(secure)),
        None => Ok(redirect("/")),
    }
}

async fn register(form: RegisterForm, playroom: Arc<Playroom>) -> Result<Response, Rejection> {
    let registration = Registration::try_from(form).map_err(reject)?;
    playroom.register(registration).await.map_err(reject)?;

    Ok(redirect("/"))
}

async fn play(authed: Authed, form: GameForm) -> Result<Response, Rejection> {
    let game = Game::try_from(form).map_err(reject)?;
    info!("user {} playing {}", authed.user_id(), game.name());

    Ok(warp::reply::html(game.page()).into_response())
}

fn reject(e: Error) -> Rejection {
    warp::reject::custom(e)
}

fn redirect(to: &'static str) -> Response {
    warp::redirect::found(Uri::from_static(to)).into_response()
}

fn session_cookie(session: &Session, secure: bool) -> Cookie<'static> {
    // no expiry: the cookie lasts as long as the browser session
    Cookie::build((SESSION_ID, session.id().to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

fn removal_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_ID, ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(time::Duration::ZERO)
        .build()
}

fn with_cookie(mut response: Response, cookie: Cookie<'_>) -> Result<Response, Rejection> {
    let value = HeaderValue::from_str(&cookie.to_string()).map_err(|e| {
        error!("invalid cookie header: {e:?}");
        reject(Error::Internal)
    })?;

    response.headers_mut().append(header::SET_COOKIE, value);
    Ok(response)
}

fn no_cache() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers
}

fn apology(message: &str, status: StatusCode) -> Response {
    warp::reply::with_status(
        warp::reply::html(templates::apology(message, status.as_u16())),
        status,
    )
    .into_response()
}

async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    if let Some(&e) = err.find::<Error>() {
        if e == Error::LoginRequired {
            return Ok(redirect("/login"));
        }
        return Ok(apology(e.message(), e.into()));
    }

    // body rejections first: a POST route's bad body sits alongside the
    // MethodNotAllowed from the GET route on the same path
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "page not found")
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "request too large")
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "request length required")
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (StatusCode::UNSUPPORTED_MEDIA_TYPE, "expected a form submission")
    } else if err.find::<warp::body::BodyDeserializeError>().is_some() {
        (StatusCode::BAD_REQUEST, "malformed form")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
    } else {
        error!("unhandled rejection: {err:?}");
        (StatusCode::INTERNAL_SERVER_ERROR, "something went wrong")
    };

    Ok(apology(message, status))
}

#[cfg(test)]
mod test {
    use super::*;

    use warp::http::Response;
    use warp::hyper::body::Bytes;
    use warp::test::{request, RequestBuilder};

    async fn create_playroom() -> Arc<Playroom> {
        let backend = backend::test::create_db().await;
        let sessions = Sessions::new(None).unwrap();
        Arc::new(Playroom::new(backend, sessions))
    }

    fn post(path: &str, body: &str) -> RequestBuilder {
        request()
            .method("POST")
            .path(path)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(body)
    }

    fn with_session(req: RequestBuilder, session: &str) -> RequestBuilder {
        req.header("cookie", format!("{SESSION_ID}={session}"))
    }

    fn location(res: &Response<Bytes>) -> &str {
        res.headers()[header::LOCATION].to_str().unwrap()
    }

    fn set_cookie(res: &Response<Bytes>) -> Option<String> {
        let value = res.headers().get(header::SET_COOKIE)?.to_str().unwrap();
        let cookie = Cookie::parse(value.to_string()).unwrap();
        assert_eq!(cookie.name(), SESSION_ID);
        Some(cookie.value().to_string())
    }

    fn body(res: &Response<Bytes>) -> &str {
        std::str::from_utf8(res.body()).unwrap()
    }

    macro_rules! app {
        ($playroom:expr) => {
            routes(Arc::clone(&$playroom), false, "static".into())
        };
    }

    async fn register_and_login(playroom: &Arc<Playroom>) -> String {
        let app = app!(playroom);

        let res = post(
            "/register",
            "username=alice&password=secret&confirmation=secret&email=alice%40x.com",
        )
        .reply(&app)
        .await;
        assert_eq!(res.status(), StatusCode::FOUND);

        let res = post("/login", "username=alice&password=secret")
            .reply(&app)
            .await;
        assert_eq!(res.status(), StatusCode::FOUND);
        set_cookie(&res).expect("session cookie")
    }

    #[tokio::test]
    async fn register_login_scenario() {
        let playroom = create_playroom().await;
        let app = app!(playroom);

        let res = post(
            "/register",
            "username=alice&password=secret&confirmation=secret&email=alice%40x.com",
        )
        .reply(&app)
        .await;
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(location(&res), "/");
        assert_eq!(set_cookie(&res), None);

        // registering doesn't log in
        let res = request().path("/").reply(&app).await;
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(location(&res), "/login");

        let res = post("/login", "username=alice&password=secret")
            .reply(&app)
            .await;
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(location(&res), "/");
        let session = set_cookie(&res).expect("session cookie");

        let res = with_session(request().path("/"), &session).reply(&app).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body(&res), templates::INDEX);

        let res = with_session(post("/login", "username=alice&password=wrong"), &session)
            .reply(&app)
            .await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert!(body(&res).contains("invalid username and-or password"));

        // the failed attempt still dropped the earlier login
        let res = with_session(request().path("/"), &session).reply(&app).await;
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(location(&res), "/login");
    }

    #[tokio::test]
    async fn unknown_user_is_rejected() {
        let playroom = create_playroom().await;
        let app = app!(playroom);

        let res = post("/login", "username=nobody&password=secret")
            .reply(&app)
            .await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(set_cookie(&res), None);
    }

    #[tokio::test]
    async fn login_requires_fields() {
        let playroom = create_playroom().await;
        let app = app!(playroom);

        let res = post("/login", "username=alice").reply(&app).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert!(body(&res).contains("must provide password"));

        let res = post("/login", "password=secret").reply(&app).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert!(body(&res).contains("must provide username"));
    }

    #[tokio::test]
    async fn taken_username() {
        let playroom = create_playroom().await;
        let app = app!(playroom);
        let form = "username=bob&password=pw&confirmation=pw&email=bob%40x.com";

        assert_eq!(post("/register", form).reply(&app).await.status(), StatusCode::FOUND);

        let res = post("/register", form).reply(&app).await;
        assert_eq!(res.status(), StatusCode::CONFLICT);
        assert!(body(&res).contains("Sorry, username taken."));
    }

    #[tokio::test]
    async fn register_validation() {
        let playroom = create_playroom().await;
        let app = app!(playroom);

        let res = post("/register", "username=bob&password=pw&confirmation=nope&email=b%40x.com")
            .reply(&app)
            .await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert!(body(&res).contains("Sorry, password doesn&#x27;t match"));

        let res = post("/register", "username=bob&password=pw&confirmation=pw")
            .reply(&app)
            .await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert!(body(&res).contains("You are required to enter your email"));
    }

    #[tokio::test]
    async fn logout_without_session() {
        let playroom = create_playroom().await;
        let app = app!(playroom);

        let res = request().path("/logout").reply(&app).await;
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(location(&res), "/");

        let res = request().path("/").reply(&app).await;
        assert_eq!(location(&res), "/login");
    }

    #[tokio::test]
    async fn logout_ends_session() {
        let playroom = create_playroom().await;
        let app = app!(playroom);
        let session = register_and_login(&playroom).await;

        let res = with_session(request().path("/logout"), &session)
            .reply(&app)
            .await;
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(location(&res), "/");
        assert_eq!(set_cookie(&res).as_deref(), Some(""));

        let res = with_session(request().path("/games"), &session)
            .reply(&app)
            .await;
        assert_eq!(location(&res), "/login");
    }

    #[tokio::test]
    async fn login_page_clears_session() {
        let playroom = create_playroom().await;
        let app = app!(playroom);
        let session = register_and_login(&playroom).await;

        let res = with_session(request().path("/login"), &session)
            .reply(&app)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body(&res), templates::LOGIN);

        let res = with_session(request().path("/"), &session).reply(&app).await;
        assert_eq!(location(&res), "/login");
    }

    #[tokio::test]
    async fn games_need_login() {
        let playroom = create_playroom().await;
        let app = app!(playroom);

        let res = request().path("/games").reply(&app).await;
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(location(&res), "/login");

        let res = post("/games", "game=Breakout").reply(&app).await;
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(location(&res), "/login");
    }

    #[tokio::test]
    async fn choose_game() {
        let playroom = create_playroom().await;
        let app = app!(playroom);
        let session = register_and_login(&playroom).await;

        let res = with_session(request().path("/games"), &session)
            .reply(&app)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body(&res), templates::GAMES);

        let res = with_session(post("/games", "game=Breakout"), &session)
            .reply(&app)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body(&res), templates::BREAKOUT);

        let res = with_session(post("/games", "game=Hello+World"), &session)
            .reply(&app)
            .await;
        assert_eq!(body(&res), templates::HELLO);

        let res = with_session(post("/games", "game=Unknown"), &session)
            .reply(&app)
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert!(body(&res).contains("unknown game"));

        let res = with_session(post("/games", ""), &session).reply(&app).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn responses_are_uncached() {
        let playroom = create_playroom().await;
        let app = app!(playroom);

        for path in ["/", "/login", "/register", "/nowhere"] {
            let res = request().path(path).reply(&app).await;
            let headers = res.headers();

            assert_eq!(
                headers[header::CACHE_CONTROL],
                "no-cache, no-store, must-revalidate",
                "{path}",
            );
            assert_eq!(headers[header::PRAGMA], "no-cache", "{path}");
            assert_eq!(headers[header::EXPIRES], "0", "{path}");
        }
    }

    #[tokio::test]
    async fn oversized_form() {
        let playroom = create_playroom().await;
        let app = app!(playroom);
        let padding = "x".repeat(FORM_LIMIT as usize + 4096);

        let res = post("/login", &format!("username=alice&password={padding}"))
            .reply(&app)
            .await;
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(body(&res).contains("request too large"));
    }

    #[tokio::test]
    async fn form_of_wrong_type() {
        let playroom = create_playroom().await;
        let app = app!(playroom);

        let res = request()
            .method("POST")
            .path("/login")
            .header("content-type", "application/json")
            .body(r#"{"username":"alice","password":"secret"}"#)
            .reply(&app)
            .await;
        assert_eq!(res.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let res = request()
            .method("POST")
            .path("/register")
            .header("content-type", "application/json")
            .body("{}")
            .reply(&app)
            .await;
        assert_eq!(res.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn unsupported_method() {
        let playroom = create_playroom().await;
        let app = app!(playroom);

        let res = request().method("DELETE").path("/login").reply(&app).await;
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn undecodable_field_is_rejected() {
        let playroom = create_playroom().await;
        let app = app!(playroom);

        let res = post("/register", "username=%FF&password=pw&confirmation=pw&email=a%40x.com")
            .reply(&app)
            .await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert!(body(&res).contains("invalid characters"));
    }

    #[tokio::test]
    async fn shutdown_with_shared_state() {
        let playroom = create_playroom().await;
        let app = app!(playroom);
        let session = register_and_login(&playroom).await;

        // the filter tree still holds its own handle
        playroom.shutdown().await;

        let res = with_session(request().path("/"), &session).reply(&app).await;
        assert_eq!(location(&res), "/login");
    }

    #[tokio::test]
    async fn unknown_route() {
        let playroom = create_playroom().await;
        let app = app!(playroom);

        let res = request().path("/nowhere").reply(&app).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert!(body(&res).contains("page not found"));
    }

    #[tokio::test]
    async fn foreign_cookie_is_ignored() {
        let playroom = create_playroom().await;
        let app = app!(playroom);

        let res = with_session(request().path("/"), "../../etc/passwd")
            .reply(&app)
            .await;
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(location(&res), "/login");
    }

    #[test]
    fn session_cookie_attributes() {
        let session = Session::fresh();
        let cookie = session_cookie(&session, true).to_string();

        assert!(cookie.starts_with(&format!("{SESSION_ID}={}", session.id())));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(!cookie.contains("Max-Age"));
        assert!(!cookie.contains("Expires"));

        let removal = removal_cookie(false).to_string();
        assert!(removal.contains("Max-Age=0"));
        assert!(!removal.contains("Secure"));
    }
}
