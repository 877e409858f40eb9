mod distributed;
mod krylov;
